use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest GI intensity step reported by the emulator.
pub const GI_MAX_STEP: i32 = 8;

/// Table element kinds reported by the game engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableElementType {
    Solenoid,
    Switch,
    Lamp,
    Mechanism,
    GeneralIllumination,
}

impl TableElementType {
    /// Parse the single-character tag used by the engine bridge
    /// (`S`, `W`, `L`, `M`, `G`). Unknown tags yield `None`.
    pub fn from_char(tag: char) -> Option<Self> {
        match tag.to_ascii_uppercase() {
            'S' => Some(TableElementType::Solenoid),
            'W' => Some(TableElementType::Switch),
            'L' => Some(TableElementType::Lamp),
            'M' => Some(TableElementType::Mechanism),
            'G' => Some(TableElementType::GeneralIllumination),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            TableElementType::Solenoid => 'S',
            TableElementType::Switch => 'W',
            TableElementType::Lamp => 'L',
            TableElementType::Mechanism => 'M',
            TableElementType::GeneralIllumination => 'G',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableElementEvent {
    pub element_type: TableElementType,
    pub number: i32,
    pub value: i32,
}

impl TableElementEvent {
    pub fn new(element_type: TableElementType, number: i32, value: i32) -> Self {
        Self {
            element_type,
            number,
            value,
        }
    }

    /// Output intensity for this event. GI strings report brightness steps
    /// 0..=8, everything else is on/off.
    pub fn intensity(&self) -> u8 {
        match self.element_type {
            TableElementType::GeneralIllumination => {
                (self.value.clamp(0, GI_MAX_STEP) * 255 / GI_MAX_STEP) as u8
            }
            _ => {
                if self.value != 0 {
                    255
                } else {
                    0
                }
            }
        }
    }

    pub fn matches(&self, element_type: TableElementType, number: i32) -> bool {
        self.element_type == element_type && self.number == number
    }
}

impl fmt::Display for TableElementEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}={}",
            self.element_type.as_char(),
            self.number,
            self.value
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventParseError {
    #[error("empty event")]
    Empty,
    #[error("unknown element tag '{0}'")]
    UnknownTag(char),
    #[error("malformed event '{0}', expected <tag><number>=<value>")]
    Malformed(String),
}

/// Textual form used by line-based bridges: `L12=1`, `G2=8`, `S7=0`.
impl FromStr for TableElementEvent {
    type Err = EventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        let tag = chars.next().ok_or(EventParseError::Empty)?;
        let element_type =
            TableElementType::from_char(tag).ok_or(EventParseError::UnknownTag(tag))?;

        let (number, value) = chars
            .as_str()
            .split_once('=')
            .ok_or_else(|| EventParseError::Malformed(s.to_string()))?;
        let number = number
            .trim()
            .parse()
            .map_err(|_| EventParseError::Malformed(s.to_string()))?;
        let value = value
            .trim()
            .parse()
            .map_err(|_| EventParseError::Malformed(s.to_string()))?;

        Ok(TableElementEvent::new(element_type, number, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_char() {
        assert_eq!(TableElementType::from_char('S'), Some(TableElementType::Solenoid));
        assert_eq!(TableElementType::from_char('w'), Some(TableElementType::Switch));
        assert_eq!(
            TableElementType::from_char('G'),
            Some(TableElementType::GeneralIllumination)
        );
        assert_eq!(TableElementType::from_char('X'), None);
    }

    #[test]
    fn test_intensity() {
        let lamp = TableElementEvent::new(TableElementType::Lamp, 12, 1);
        assert_eq!(lamp.intensity(), 255);
        let off = TableElementEvent::new(TableElementType::Solenoid, 3, 0);
        assert_eq!(off.intensity(), 0);

        let gi_half = TableElementEvent::new(TableElementType::GeneralIllumination, 1, 4);
        assert_eq!(gi_half.intensity(), 127);
        let gi_over = TableElementEvent::new(TableElementType::GeneralIllumination, 1, 12);
        assert_eq!(gi_over.intensity(), 255);
    }

    #[test]
    fn test_parse_event() {
        let event: TableElementEvent = "L12=1".parse().unwrap();
        assert_eq!(event, TableElementEvent::new(TableElementType::Lamp, 12, 1));
        assert_eq!(event.to_string(), "L12=1");

        assert_eq!("".parse::<TableElementEvent>(), Err(EventParseError::Empty));
        assert_eq!(
            "X1=1".parse::<TableElementEvent>(),
            Err(EventParseError::UnknownTag('X'))
        );
        assert!("L12".parse::<TableElementEvent>().is_err());
        assert!("Lx=1".parse::<TableElementEvent>().is_err());
    }
}
