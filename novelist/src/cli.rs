//! Command-line argument parsing.

use std::path::PathBuf;
use thiserror::Error;

/// Directory stories are saved to when neither `--dir` nor `NOVELIST_DIR` is set.
pub const DEFAULT_STORE_DIR: &str = "stories";

#[derive(Debug, Error, PartialEq)]
pub enum CliError {
    #[error("Missing command (expected new, next, show, refine or list)")]
    MissingCommand,

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Missing value for {0}")]
    MissingValue(String),

    #[error("Invalid number for {flag}: {value}")]
    InvalidNumber { flag: String, value: String },

    #[error("Unexpected argument '{0}'")]
    UnexpectedArgument(String),

    #[error("{0} requires a story id")]
    MissingStoryId(&'static str),

    #[error("refine requires a character name")]
    MissingCharacterName,
}

/// Settings for `novelist new`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArgs {
    pub genre: String,
    pub tags: Vec<String>,
    pub tone: String,
    pub pov: String,
    pub category: String,
    pub chapters: Option<u32>,
}

impl Default for NewArgs {
    fn default() -> Self {
        Self {
            genre: "無限流".to_string(),
            tags: Vec::new(),
            tone: "suspenseful".to_string(),
            pov: "third person".to_string(),
            category: "BG".to_string(),
            chapters: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    New(NewArgs),
    /// Generate `count` chapters; `no_wait` fails instead of queueing.
    Next { id: String, count: u32, no_wait: bool },
    /// Print a story's state, or one chapter's text.
    Show { id: String, chapter: Option<u32> },
    /// Flesh out one character's profile.
    Refine { id: String, name: String },
    List,
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cli {
    pub store_dir: PathBuf,
    pub command: Command,
}

/// Parse arguments, excluding the program name.
///
/// `env_dir` is the value of `NOVELIST_DIR`, if set.
pub fn parse_args(args: &[String], env_dir: Option<String>) -> Result<Cli, CliError> {
    let mut store_dir = env_dir
        .filter(|d| !d.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
    let mut rest = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--dir" => {
                store_dir = PathBuf::from(value(args, i, "--dir")?);
                i += 1;
            }
            "--help" | "-h" => {
                return Ok(Cli {
                    store_dir,
                    command: Command::Help,
                })
            }
            _ => rest.push(args[i].clone()),
        }
        i += 1;
    }

    let Some((name, rest)) = rest.split_first() else {
        return Err(CliError::MissingCommand);
    };
    let command = match name.as_str() {
        "new" => Command::New(parse_new(rest)?),
        "next" => parse_next(rest)?,
        "show" => parse_show(rest)?,
        "refine" => parse_refine(rest)?,
        "list" => match rest.first() {
            Some(extra) => return Err(CliError::UnexpectedArgument(extra.clone())),
            None => Command::List,
        },
        "help" => Command::Help,
        other => return Err(CliError::UnknownCommand(other.to_string())),
    };

    Ok(Cli { store_dir, command })
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, CliError> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| CliError::MissingValue(flag.to_string()))
}

fn number(args: &[String], i: usize, flag: &str) -> Result<u32, CliError> {
    let raw = value(args, i, flag)?;
    raw.parse().map_err(|_| CliError::InvalidNumber {
        flag: flag.to_string(),
        value: raw.to_string(),
    })
}

fn parse_new(args: &[String]) -> Result<NewArgs, CliError> {
    let mut new = NewArgs::default();

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--genre" => new.genre = value(args, i, flag)?.to_string(),
            "--tone" => new.tone = value(args, i, flag)?.to_string(),
            "--pov" => new.pov = value(args, i, flag)?.to_string(),
            "--category" => new.category = value(args, i, flag)?.to_string(),
            "--chapters" => new.chapters = Some(number(args, i, flag)?),
            "--tag" | "--tags" => new.tags.extend(
                value(args, i, flag)?
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string),
            ),
            other => return Err(CliError::UnexpectedArgument(other.to_string())),
        }
        i += 2;
    }

    Ok(new)
}

fn parse_next(args: &[String]) -> Result<Command, CliError> {
    let mut id = None;
    let mut count = 1;
    let mut no_wait = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-n" => {
                count = number(args, i, "--count")?.max(1);
                i += 1;
            }
            "--no-wait" => no_wait = true,
            other if other.starts_with('-') => {
                return Err(CliError::UnexpectedArgument(other.to_string()))
            }
            other if id.is_none() => id = Some(other.to_string()),
            other => return Err(CliError::UnexpectedArgument(other.to_string())),
        }
        i += 1;
    }

    Ok(Command::Next {
        id: id.ok_or(CliError::MissingStoryId("next"))?,
        count,
        no_wait,
    })
}

fn parse_show(args: &[String]) -> Result<Command, CliError> {
    let mut id = None;
    let mut chapter = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--chapter" => {
                chapter = Some(number(args, i, "--chapter")?);
                i += 1;
            }
            other if other.starts_with('-') => {
                return Err(CliError::UnexpectedArgument(other.to_string()))
            }
            other if id.is_none() => id = Some(other.to_string()),
            other => return Err(CliError::UnexpectedArgument(other.to_string())),
        }
        i += 1;
    }

    Ok(Command::Show {
        id: id.ok_or(CliError::MissingStoryId("show"))?,
        chapter,
    })
}

fn parse_refine(args: &[String]) -> Result<Command, CliError> {
    let Some((id, name)) = args.split_first() else {
        return Err(CliError::MissingStoryId("refine"));
    };
    if let Some(flag) = name.iter().find(|a| a.starts_with('-')) {
        return Err(CliError::UnexpectedArgument(flag.clone()));
    }
    let name = name.join(" ");
    if name.trim().is_empty() {
        return Err(CliError::MissingCharacterName);
    }
    Ok(Command::Refine {
        id: id.clone(),
        name,
    })
}

pub fn print_help() {
    println!("novelist - serialized fiction generator");
    println!();
    println!("USAGE:");
    println!("    novelist [--dir <path>] <command> [options]");
    println!();
    println!("COMMANDS:");
    println!("    new     Create a story (bible and opening chapter)");
    println!("              --genre <label>  --tags <a,b>  --tone <tone>  --pov <pov>");
    println!("              --category <BG|BL|GL>  --chapters <n>");
    println!("    next    Generate chapters: next <id> [--count <n>] [--no-wait]");
    println!("    show    Print story state: show <id> [--chapter <n>]");
    println!("    refine  Flesh out a character's profile: refine <id> <name>");
    println!("    list    List saved stories");
    println!();
    println!("ENVIRONMENT:");
    println!("    NOVEL_PRIMARY_BACKEND   anthropic or gemini (default)");
    println!("    ANTHROPIC_API_KEY, GEMINI_API_KEY, OPENROUTER_API_KEY");
    println!("    NOVELIST_DIR            story directory (default: {DEFAULT_STORE_DIR})");
    println!("    NOVELIST_LANGUAGE       language chapters are written in");
    println!("    NOVELIST_LOG_JSON       set to 1 for JSON logs");
    println!("    RUST_LOG                log filter (default: info)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_parse_new() {
        let cli = parse_args(
            &args("new --genre 修仙 --tags 虐,馬甲 --tag 重生 --chapters 120"),
            None,
        )
        .unwrap();
        assert_eq!(cli.store_dir, PathBuf::from(DEFAULT_STORE_DIR));
        match cli.command {
            Command::New(new) => {
                assert_eq!(new.genre, "修仙");
                assert_eq!(new.tags, vec!["虐", "馬甲", "重生"]);
                assert_eq!(new.chapters, Some(120));
                assert_eq!(new.tone, "suspenseful");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_next_and_dir() {
        let cli = parse_args(&args("--dir /tmp/s next abc -n 3 --no-wait"), Some("ignored".into())).unwrap();
        assert_eq!(cli.store_dir, PathBuf::from("/tmp/s"));
        assert_eq!(
            cli.command,
            Command::Next {
                id: "abc".to_string(),
                count: 3,
                no_wait: true
            }
        );

        let cli = parse_args(&args("next abc"), Some("/data".into())).unwrap();
        assert_eq!(cli.store_dir, PathBuf::from("/data"));
    }

    #[test]
    fn test_parse_show_and_list() {
        assert_eq!(
            parse_args(&args("show abc --chapter 2"), None).unwrap().command,
            Command::Show {
                id: "abc".to_string(),
                chapter: Some(2)
            }
        );
        assert_eq!(parse_args(&args("list"), None).unwrap().command, Command::List);
        assert_eq!(parse_args(&args("list -h"), None).unwrap().command, Command::Help);
    }

    #[test]
    fn test_parse_refine() {
        assert_eq!(
            parse_args(&args("refine abc Gu Chen"), None).unwrap().command,
            Command::Refine {
                id: "abc".to_string(),
                name: "Gu Chen".to_string()
            }
        );
        assert_eq!(
            parse_args(&args("refine abc"), None),
            Err(CliError::MissingCharacterName)
        );
        assert_eq!(
            parse_args(&args("refine"), None),
            Err(CliError::MissingStoryId("refine"))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_args(&[], None), Err(CliError::MissingCommand));
        assert_eq!(
            parse_args(&args("write"), None),
            Err(CliError::UnknownCommand("write".to_string()))
        );
        assert_eq!(
            parse_args(&args("next"), None),
            Err(CliError::MissingStoryId("next"))
        );
        assert_eq!(
            parse_args(&args("new --chapters lots"), None),
            Err(CliError::InvalidNumber {
                flag: "--chapters".to_string(),
                value: "lots".to_string()
            })
        );
        assert_eq!(
            parse_args(&args("new --genre"), None),
            Err(CliError::MissingValue("--genre".to_string()))
        );
    }
}
