//! Text command parser

use crate::commands::Command;
use lockstep_control::{DeckId, Group};
use thiserror::Error;

/// Errors that can occur when parsing a command line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid deck: {0}")]
    InvalidDeck(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Expected on or off, got: {0}")]
    InvalidSwitch(String),
}

/// Parse one line of input into a command
///
/// Deck numbers are 1-based. Extra trailing words are ignored.
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Err(ParseError::Empty);
    };
    let mut arg = |what: &'static str| words.next().ok_or(ParseError::MissingArgument(what));

    let command = match name.to_ascii_lowercase().as_str() {
        "master" | "m" => {
            let target = arg("deck")?;
            if target.eq_ignore_ascii_case("internal") || target == "0" {
                Command::SetMaster(Group::Master)
            } else {
                Command::SetMaster(Group::Deck(parse_deck(target)?))
            }
        }
        "unmaster" => Command::Unmaster(parse_deck(arg("deck")?)?),
        "slave" | "s" => {
            let deck = parse_deck(arg("deck")?)?;
            Command::SetSlave(deck, parse_switch(arg("on|off")?)?)
        }
        "rate" | "r" => {
            let deck = parse_deck(arg("deck")?)?;
            Command::SetRate(deck, parse_number(arg("rate")?)?)
        }
        "bpm" => {
            let deck = parse_deck(arg("deck")?)?;
            Command::SetFileBpm(deck, parse_number(arg("bpm")?)?)
        }
        "active" | "a" => {
            let deck = parse_deck(arg("deck")?)?;
            Command::SetActive(deck, parse_switch(arg("on|off")?)?)
        }
        "phase" | "p" => {
            let deck = parse_deck(arg("deck")?)?;
            Command::SetPhase(deck, parse_number(arg("phase")?)?)
        }
        "tempo" | "t" => Command::SetTempo(parse_number(arg("bpm")?)?),
        "samplerate" | "sr" => {
            let value = arg("sample rate")?;
            let rate = value
                .parse::<u32>()
                .map_err(|_| ParseError::InvalidNumber(value.to_string()))?;
            Command::SetSampleRate(rate)
        }
        "add" => Command::AddDeck,
        "remove" | "rm" => Command::RemoveDeck(parse_deck(arg("deck")?)?),
        "status" | "st" => Command::Status,
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        _ => return Err(ParseError::UnknownCommand(name.to_string())),
    };

    Ok(command)
}

/// Accepts `2` as well as `[Channel2]`
fn parse_deck(word: &str) -> Result<DeckId, ParseError> {
    if let Ok(Group::Deck(id)) = word.parse::<Group>() {
        return Ok(id);
    }
    word.parse::<u8>()
        .ok()
        .and_then(DeckId::new)
        .ok_or_else(|| ParseError::InvalidDeck(word.to_string()))
}

fn parse_number(word: &str) -> Result<f64, ParseError> {
    match word.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ParseError::InvalidNumber(word.to_string())),
    }
}

fn parse_switch(word: &str) -> Result<bool, ParseError> {
    match word.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" | "yes" => Ok(true),
        "off" | "0" | "false" | "no" => Ok(false),
        _ => Err(ParseError::InvalidSwitch(word.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deck(n: u8) -> DeckId {
        DeckId::new(n).unwrap()
    }

    #[test]
    fn test_master_commands() {
        assert_eq!(
            parse_command("master 2"),
            Ok(Command::SetMaster(Group::Deck(deck(2))))
        );
        assert_eq!(
            parse_command("master internal"),
            Ok(Command::SetMaster(Group::Master))
        );
        assert_eq!(
            parse_command("m [Channel3]"),
            Ok(Command::SetMaster(Group::Deck(deck(3))))
        );
        assert_eq!(parse_command("unmaster 1"), Ok(Command::Unmaster(deck(1))));
    }

    #[test]
    fn test_deck_state_commands() {
        assert_eq!(
            parse_command("rate 1 1.04"),
            Ok(Command::SetRate(deck(1), 1.04))
        );
        assert_eq!(
            parse_command("rate 2 -1"),
            Ok(Command::SetRate(deck(2), -1.0))
        );
        assert_eq!(
            parse_command("bpm 2 128"),
            Ok(Command::SetFileBpm(deck(2), 128.0))
        );
        assert_eq!(
            parse_command("slave 1 on"),
            Ok(Command::SetSlave(deck(1), true))
        );
        assert_eq!(
            parse_command("ACTIVE 4 Off"),
            Ok(Command::SetActive(deck(4), false))
        );
        assert_eq!(
            parse_command("phase 1 0.5"),
            Ok(Command::SetPhase(deck(1), 0.5))
        );
    }

    #[test]
    fn test_session_commands() {
        assert_eq!(parse_command("tempo 120"), Ok(Command::SetTempo(120.0)));
        assert_eq!(
            parse_command("samplerate 48000"),
            Ok(Command::SetSampleRate(48000))
        );
        assert_eq!(parse_command("  add  "), Ok(Command::AddDeck));
        assert_eq!(parse_command("rm 3"), Ok(Command::RemoveDeck(deck(3))));
        assert_eq!(parse_command("status"), Ok(Command::Status));
        assert!(parse_command("q").unwrap().is_quit());
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse_command("   "), Err(ParseError::Empty));
        assert_eq!(
            parse_command("scratch 1"),
            Err(ParseError::UnknownCommand("scratch".to_string()))
        );
        assert_eq!(
            parse_command("rate 1"),
            Err(ParseError::MissingArgument("rate"))
        );
        assert_eq!(
            parse_command("master 0x"),
            Err(ParseError::InvalidDeck("0x".to_string()))
        );
        assert_eq!(
            parse_command("remove 0"),
            Err(ParseError::InvalidDeck("0".to_string()))
        );
        assert_eq!(
            parse_command("tempo fast"),
            Err(ParseError::InvalidNumber("fast".to_string()))
        );
        assert_eq!(
            parse_command("tempo NaN"),
            Err(ParseError::InvalidNumber("NaN".to_string()))
        );
        assert_eq!(
            parse_command("slave 1 maybe"),
            Err(ParseError::InvalidSwitch("maybe".to_string()))
        );
    }
}
