use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Dataset stage written to the `Stage` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Train,
    Valid,
    Test,
}

impl Stage {
    /// Fold 0 is the test set, fold 1 validation, every other fold training.
    pub fn from_fold(fold: usize) -> Self {
        match fold {
            0 => Stage::Test,
            1 => Stage::Valid,
            _ => Stage::Train,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Train => "train",
            Stage::Valid => "valid",
            Stage::Test => "test",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "train" => Ok(Stage::Train),
            "valid" => Ok(Stage::Valid),
            "test" => Ok(Stage::Test),
            other => Err(format!("unknown stage {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_policy() {
        assert_eq!(Stage::from_fold(0), Stage::Test);
        assert_eq!(Stage::from_fold(1), Stage::Valid);
        for fold in 2..10 {
            assert_eq!(Stage::from_fold(fold), Stage::Train);
        }
    }

    #[test]
    fn parses_only_the_three_stage_names() {
        for stage in [Stage::Train, Stage::Valid, Stage::Test] {
            assert_eq!(stage.as_str().parse::<Stage>(), Ok(stage));
        }
        assert!("val".parse::<Stage>().is_err());
    }
}
