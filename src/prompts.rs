use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::PromoGenError;

/// Negative prompt applied to every generation run.
pub const NEGATIVE_PROMPT: &str = "snow, ugly, disfigured, deformed";

/// Audience gender the product art is themed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub const ALL: [Self; 2] = [Self::Male, Self::Female];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = PromoGenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "male" => Ok(Self::Male),
            "female" => Ok(Self::Female),
            other => Err(PromoGenError::validation(
                "gender",
                format!("has no prompt mapping for `{other}` (expected `male` or `female`)"),
            )),
        }
    }
}

/// Product format the generated art advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductFormat {
    Pkzn,
    Pk,
    Ac,
    Tc,
}

impl ProductFormat {
    pub const ALL: [Self; 4] = [Self::Pkzn, Self::Pk, Self::Ac, Self::Tc];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pkzn => "pkzn",
            Self::Pk => "pk",
            Self::Ac => "ac",
            Self::Tc => "tc",
        }
    }
}

impl fmt::Display for ProductFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductFormat {
    type Err = PromoGenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pkzn" => Ok(Self::Pkzn),
            "pk" => Ok(Self::Pk),
            "ac" => Ok(Self::Ac),
            "tc" => Ok(Self::Tc),
            other => Err(PromoGenError::validation(
                "format",
                format!("has no prompt mapping for `{other}` (expected `pkzn`, `pk`, `ac` or `tc`)"),
            )),
        }
    }
}

/// Prompt table: one fixed literal per (format, gender) pair.
///
/// The strings are tied to the checkpoint the pipeline was trained against
/// (`gazprom style` is its trigger phrase) and are not constructed
/// dynamically. Unknown wire strings never reach this function; they are
/// rejected while parsing [`Gender`] / [`ProductFormat`].
pub const fn prompt_for(format: ProductFormat, gender: Gender) -> &'static str {
    use Gender::{Female, Male};
    use ProductFormat::{Ac, Pk, Pkzn, Tc};

    match (format, gender) {
        (Pkzn, Male) => "gazprom style, a house with a car, white background, concept art",
        (Pkzn, Female) => "gazprom style, a house with flowers, blue background, (((concept art)))",
        (Pk, Male) => "gazprom style, house with the palm tree, white background, concept art",
        (Pk, Female) => "gazprom style, flowers with coins, white background, concept art",
        (Ac, Male) => "gazprom style, a car with coins, white background, concept art",
        (Ac, Female) => "gazprom style, a car with flowers, white background, concept art",
        (Tc, Male) => "gazprom style, a bag of coins, white background, (((concept art)))",
        (Tc, Female) => "gazprom style, coins with a bow, white background, concept art",
    }
}
