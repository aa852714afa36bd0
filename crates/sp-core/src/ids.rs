use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a step within a script definition.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StepId(pub u32);

/// Identifier of a choice, unique within its owning step.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChoiceId(pub u32);

/// Identifier of a property in the property store.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PropertyId(pub u32);

macro_rules! id_impls {
    ($name:ident) => {
        impl $name {
            pub fn new(value: u32) -> Self {
                Self(value)
            }

            pub fn value(self) -> u32 {
                self.0
            }

            /// Ids are opaque positive integers; zero marks an unset id.
            pub fn is_valid(self) -> bool {
                self.0 > 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

id_impls!(StepId);
id_impls!(ChoiceId);
id_impls!(PropertyId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_id_is_invalid() {
        assert!(!StepId::new(0).is_valid());
        assert!(StepId::new(1).is_valid());
        assert!(!PropertyId::default().is_valid());
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&StepId::new(7)).expect("serialize");
        assert_eq!(json, "7");
        let back: StepId = serde_json::from_str("7").expect("deserialize");
        assert_eq!(back, StepId::new(7));
    }
}
