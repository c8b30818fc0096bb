#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Long-running scheduler mode.
    Run,
    /// One-shot incremental update, then exit.
    Incremental,
    /// One-shot full rescan from the genesis block, then exit.
    Full,
}

pub fn parse_args<I>(mut args: I) -> std::result::Result<Command, String>
where
    I: Iterator<Item = String>,
{
    // Drop argv[0].
    let _ = args.next();

    let Some(cmd) = args.next() else {
        return Ok(Command::Run);
    };

    match cmd.as_str() {
        "run" => Ok(Command::Run),
        "incremental" => Ok(Command::Incremental),
        "full" => Ok(Command::Full),
        other => Err(format!(
            "unknown command: {other} (expected run, incremental or full)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, String> {
        parse_args(args.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn test_parse_args_defaults_to_run() {
        assert_eq!(parse(&["tracker"]).unwrap(), Command::Run);
    }

    #[test]
    fn test_parse_one_shot_verbs() {
        assert_eq!(parse(&["tracker", "incremental"]).unwrap(), Command::Incremental);
        assert_eq!(parse(&["tracker", "full"]).unwrap(), Command::Full);
    }

    #[test]
    fn test_parse_unknown_command() {
        assert!(parse(&["tracker", "bogus"]).is_err());
    }
}
