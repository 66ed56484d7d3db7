// Line-oriented control input read from stdin.

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `switch <id>`: the viewer tuned to a channel
    Switch(String),
    /// `favorites <id> [id...]`: replace the favorites list (no ids clears it)
    Favorites(Vec<String>),
    /// `play <id>`: take a cached stream and report what was buffered
    Play(String),
    /// `evict <id>`
    Evict(String),
    /// `predict [n]`: ranked next channels for the active one
    Predict(usize),
    Stats,
    Help,
    Quit,
}

pub const HELP: &str = "commands: switch <id> | favorites [id...] | play <id> | evict <id> | predict [n] | stats | help | quit";

impl Command {
    /// Parses one input line. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let rest: Vec<String> = words
            .flat_map(|w| w.split(','))
            .filter(|w| !w.is_empty())
            .map(str::to_owned)
            .collect();

        let command = match verb.to_ascii_lowercase().as_str() {
            "switch" | "s" => Self::Switch(single(&rest, "switch")?),
            "favorites" | "fav" => Self::Favorites(rest),
            "play" | "p" => Self::Play(single(&rest, "play")?),
            "evict" => Self::Evict(single(&rest, "evict")?),
            "predict" => {
                let n = match rest.first() {
                    Some(n) => n
                        .parse()
                        .map_err(|_| AppError::InvalidCommand(format!("invalid count `{n}`")))?,
                    None => 5,
                };
                Self::Predict(n)
            }
            "stats" => Self::Stats,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => {
                return Err(AppError::InvalidCommand(format!(
                    "unknown command `{other}`"
                )));
            }
        };
        Ok(Some(command))
    }
}

fn single(args: &[String], name: &str) -> Result<String> {
    match args {
        [id] => Ok(id.clone()),
        _ => Err(AppError::InvalidCommand(format!(
            "`{name}` takes exactly one channel id"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(
            Command::parse("switch 12").unwrap(),
            Some(Command::Switch("12".into()))
        );
        assert_eq!(
            Command::parse("  FAV 1,2 5 ").unwrap(),
            Some(Command::Favorites(vec!["1".into(), "2".into(), "5".into()]))
        );
        assert_eq!(
            Command::parse("favorites").unwrap(),
            Some(Command::Favorites(Vec::new()))
        );
        assert_eq!(Command::parse("predict").unwrap(), Some(Command::Predict(5)));
        assert_eq!(Command::parse("predict 2").unwrap(), Some(Command::Predict(2)));
        assert_eq!(Command::parse("q").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn ignores_blank_and_comments() {
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert_eq!(Command::parse("# channel surfing").unwrap(), None);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Command::parse("switch").is_err());
        assert!(Command::parse("switch 1 2").is_err());
        assert!(Command::parse("predict many").is_err());
        assert!(Command::parse("rewind 3").is_err());
    }
}
