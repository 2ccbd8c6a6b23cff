// persona.rs
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::message::PartnerProfile;
use crate::profile::{Gender, Preference};

const FEMALE_NAMES: &[&str] = &[
    "Emma", "Olivia", "Mia", "Sofia", "Chloe", "Lena", "Zoe", "Ava", "Nora", "Ella",
];
const MALE_NAMES: &[&str] = &[
    "Liam", "Noah", "Lucas", "Leo", "Ethan", "Max", "Oscar", "Finn", "Jack", "Adam",
];
const CITIES: &[&str] = &[
    "London", "Berlin", "Lisbon", "Toronto", "Austin", "Dublin", "Melbourne", "Oslo",
];

const OPENERS: &[&str] = &["hey! how's it going?", "hii :) where are you from?", "hey there, what's up?"];
const REPLIES: &[&str] = &[
    "haha really?",
    "that's cool, tell me more",
    "omg same",
    "nice! what else do you like doing?",
    "lol I get that",
];
const FAREWELLS: &[&str] = &[
    "oh I have to run, nice talking to you!",
    "gotta go, bye! :)",
    "sorry, need to head off. take care!",
];

/// Synthetic profile worn by a bot for the length of one chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub age: u8,
    pub city: String,
    pub gender: Gender,
    /// Who the persona is looking for. Always accepts the user it was made for.
    pub preference: Preference,
    pub avatar: String,
}

impl Persona {
    /// Builds a persona the user asked for: the gender follows `preference`
    /// and the persona in turn is looking for someone of `user_gender`.
    pub fn generate<R: Rng + ?Sized>(
        rng: &mut R,
        user_gender: Gender,
        preference: Preference,
        avatar_base: &str,
    ) -> Self {
        let gender = match preference {
            Preference::Male => Gender::Male,
            Preference::Female => Gender::Female,
            Preference::Any => {
                if rng.random_bool(0.5) {
                    Gender::Female
                } else {
                    Gender::Male
                }
            }
        };
        let names = match gender {
            Gender::Female => FEMALE_NAMES,
            Gender::Male => MALE_NAMES,
        };
        let folder = match gender {
            Gender::Female => "women",
            Gender::Male => "men",
        };
        Self {
            name: pick(rng, names).to_string(),
            age: rng.random_range(19..=29),
            city: pick(rng, CITIES).to_string(),
            gender,
            preference: match user_gender {
                Gender::Male => Preference::Male,
                Gender::Female => Preference::Female,
            },
            avatar: format!(
                "{}/{}/{}.jpg",
                avatar_base.trim_end_matches('/'),
                folder,
                rng.random_range(1..=99)
            ),
        }
    }

    pub fn partner_profile(&self) -> PartnerProfile {
        PartnerProfile {
            name: self.name.clone(),
            gender: self.gender,
            age: Some(self.age),
            city: Some(self.city.clone()),
            avatar: Some(self.avatar.clone()),
        }
    }
}

fn pick<'a, R: Rng + ?Sized>(rng: &mut R, options: &[&'a str]) -> &'a str {
    options.choose(rng).copied().unwrap_or("hey")
}

pub fn scripted_opener<R: Rng + ?Sized>(rng: &mut R) -> String {
    pick(rng, OPENERS).to_string()
}

pub fn scripted_reply<R: Rng + ?Sized>(rng: &mut R) -> String {
    pick(rng, REPLIES).to_string()
}

pub fn scripted_farewell<R: Rng + ?Sized>(rng: &mut R) -> String {
    pick(rng, FAREWELLS).to_string()
}
