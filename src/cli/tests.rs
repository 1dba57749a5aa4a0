use super::*;
use std::path::PathBuf;

fn expect_cli_ok<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    match Cli::parse_from(args.into_iter()) {
        Ok(cli) => cli,
        Err(err) => panic!("expected CLI parse to succeed: {err}"),
    }
}

fn expect_cli_err<I, T>(args: I) -> CliError
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    match Cli::parse_from(args.into_iter()) {
        Ok(cli) => panic!("expected CLI parse to fail, got {cli:?}"),
        Err(err) => err,
    }
}

#[test]
fn parses_run_with_weave_options() {
    let cli = expect_cli_ok([
        "run",
        "aspects.yaml",
        "--mode",
        "Parallel",
        "-j",
        "3",
        "--format",
        "json",
        "--commit",
        "--config",
        "ci.yaml",
    ]);
    assert_eq!(
        cli.command,
        Command::Run {
            args: WeaveArgs {
                fixture: PathBuf::from("aspects.yaml"),
                config: Some(PathBuf::from("ci.yaml")),
                mode: Some("parallel".into()),
                seed: None,
                max_workers: Some(3),
                output: OutputFormat::Json,
            },
            commit: true,
        }
    );
    assert!(cli.log.is_empty());
}

#[test]
fn log_flags_are_accepted_before_and_after_the_command() {
    let cli = expect_cli_ok(["--log-level", "debug", "check", "a.yaml", "--log-format=json"]);
    assert_eq!(cli.log.level, Some(LogLevel::Debug));
    assert_eq!(cli.log.format, Some(LogFormat::Json));
    assert!(matches!(cli.command, Command::Check { .. }));
}

#[test]
fn help_and_version_forms() {
    assert_eq!(expect_cli_ok(["help"]).command, Command::Help { topic: None });
    assert_eq!(
        expect_cli_ok(["help", "RUN"]).command,
        Command::Help {
            topic: Some("run".into())
        }
    );
    assert_eq!(
        expect_cli_ok(["check", "--help"]).command,
        Command::Help {
            topic: Some("check".into())
        }
    );
    assert_eq!(expect_cli_ok(["-V"]).command, Command::Version);
    assert_eq!(expect_cli_ok(["version"]).command, Command::Version);
}

#[test]
fn rejects_invalid_invocations() {
    let missing = expect_cli_err(std::iter::empty::<String>());
    assert!(missing.to_string().starts_with("missing command"));
    assert!(missing.to_string().contains("Usage: weaver"));

    let unknown = expect_cli_err(["weave"]);
    assert!(unknown.to_string().contains("unknown command 'weave'"));

    let no_fixture = expect_cli_err(["run"]);
    assert!(no_fixture.to_string().contains("run requires a fixture path"));

    let two = expect_cli_err(["check", "a.yaml", "b.yaml"]);
    assert!(two.to_string().contains("extra argument 'b.yaml'"));

    let commit_on_check = expect_cli_err(["check", "a.yaml", "--commit"]);
    assert!(commit_on_check.to_string().contains("unsupported option '--commit' for check"));

    let zero = expect_cli_err(["run", "a.yaml", "--max-workers", "0"]);
    assert_eq!(zero.to_string(), "--max-workers must be at least 1");

    let seed = expect_cli_err(["run", "a.yaml", "--mode", "sequential", "--seed", "4"]);
    assert_eq!(seed.to_string(), "--seed only applies to --mode randomized");

    let level = expect_cli_err(["--log-level", "loud", "help"]);
    assert!(level.to_string().contains("unsupported log level 'loud'"));

    let value = expect_cli_err(["run", "a.yaml", "--seed"]);
    assert_eq!(value.to_string(), "--seed requires a value");
}

#[test]
fn usage_topics() {
    assert!(usage(None).contains("Commands:"));
    let run = usage(Some("run"));
    assert!(run.contains("weaver run <fixture.yaml>"));
    assert!(run.contains("--commit"));
    assert!(!usage(Some("check")).contains("--commit"));
    assert_eq!(usage(Some("unknown")), usage(None));
}
