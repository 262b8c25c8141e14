use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Maps time-normalised progress onto path progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Easing {
    #[default]
    Linear,
    /// Fast start, gentle arrival at the target.
    EaseOutCubic,
}

impl Easing {
    /// `t` is clamped to [0, 1].
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::EaseOutCubic => 1.0 - (1.0 - t).powi(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_endpoints_are_fixed() {
        for easing in [Easing::Linear, Easing::EaseOutCubic] {
            assert_relative_eq!(easing.apply(0.0), 0.0);
            assert_relative_eq!(easing.apply(1.0), 1.0);
            assert_relative_eq!(easing.apply(1.7), 1.0);
            assert_relative_eq!(easing.apply(-0.2), 0.0);
        }
    }

    #[test]
    fn test_ease_out_leads_linear() {
        assert_relative_eq!(Easing::Linear.apply(0.5), 0.5);
        assert_relative_eq!(Easing::EaseOutCubic.apply(0.5), 0.875);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("ease-out-cubic".parse::<Easing>(), Ok(Easing::EaseOutCubic));
        assert_eq!(Easing::Linear.to_string(), "linear");
        assert!("bounce".parse::<Easing>().is_err());
    }
}
