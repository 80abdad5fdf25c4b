use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Bus bitrates selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Bitrate {
    M1,
    #[default]
    K500,
    K250,
    K125,
    K100,
    K62,
    K50,
    K83,
    K10,
}

impl Bitrate {
    pub const ALL: [Bitrate; 9] = [
        Bitrate::M1,
        Bitrate::K500,
        Bitrate::K250,
        Bitrate::K125,
        Bitrate::K100,
        Bitrate::K62,
        Bitrate::K50,
        Bitrate::K83,
        Bitrate::K10,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Bitrate::M1 => "1M",
            Bitrate::K500 => "500K",
            Bitrate::K250 => "250K",
            Bitrate::K125 => "125K",
            Bitrate::K100 => "100K",
            Bitrate::K62 => "62K",
            Bitrate::K50 => "50K",
            Bitrate::K83 => "83K",
            Bitrate::K10 => "10K",
        }
    }

    pub fn bits_per_second(self) -> u32 {
        match self {
            Bitrate::M1 => 1_000_000,
            Bitrate::K500 => 500_000,
            Bitrate::K250 => 250_000,
            Bitrate::K125 => 125_000,
            Bitrate::K100 => 100_000,
            Bitrate::K62 => 62_500,
            Bitrate::K50 => 50_000,
            Bitrate::K83 => 83_333,
            Bitrate::K10 => 10_000,
        }
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown bitrate '{0}', options: 1M, 500K, 250K, 125K, 100K, 62K, 50K, 83K, 10K")]
pub struct ParseBitrateError(String);

impl FromStr for Bitrate {
    type Err = ParseBitrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Bitrate::ALL
            .into_iter()
            .find(|b| b.name() == wanted)
            .ok_or_else(|| ParseBitrateError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("500k".parse::<Bitrate>(), Ok(Bitrate::K500));
        assert_eq!("1M".parse::<Bitrate>(), Ok(Bitrate::M1));
        assert_eq!(" 83K ".parse::<Bitrate>(), Ok(Bitrate::K83));
        assert!("800K".parse::<Bitrate>().is_err());
    }

    #[test]
    fn every_name_round_trips() {
        for bitrate in Bitrate::ALL {
            assert_eq!(bitrate.name().parse::<Bitrate>(), Ok(bitrate));
        }
    }

    #[test]
    fn default_is_500k() {
        assert_eq!(Bitrate::default().bits_per_second(), 500_000);
    }
}
