use clap::Parser;
use flotilla::cli::commands::config::ConfigCommand;
use flotilla::cli::{Cli, Commands};
use flotilla::domain::models::{AgentSymbol, ObjectiveKind};
use std::path::PathBuf;

#[test]
fn test_parse_run_with_pins() {
    let cli = Cli::try_parse_from(vec![
        "flotilla",
        "run",
        "--manifest",
        "fleet.yaml",
        "--assign",
        "H-1:contract:CT-7",
        "-a",
        "p-1:idle",
    ])
    .unwrap();

    match cli.command {
        Commands::Run(args) => {
            assert_eq!(args.manifest, PathBuf::from("fleet.yaml"));
            assert_eq!(args.assignments.len(), 2);
            assert_eq!(args.assignments[0].agent, AgentSymbol::new("H-1"));
            assert_eq!(args.assignments[0].request.kind, ObjectiveKind::Contract);
            assert_eq!(args.assignments[1].agent, AgentSymbol::new("P-1"));
            assert_eq!(args.assignments[1].request.kind, ObjectiveKind::Idle);
        }
        _ => panic!("Wrong top-level command"),
    }
    assert!(!cli.json);
}

#[test]
fn test_parse_run_rejects_bad_pin() {
    let result = Cli::try_parse_from(vec![
        "flotilla",
        "run",
        "--manifest",
        "fleet.yaml",
        "--assign",
        "H-1:mine:X1",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_parse_plan_with_credit_override() {
    let cli = Cli::try_parse_from(vec![
        "flotilla",
        "plan",
        "-m",
        "fleet.yaml",
        "--credits",
        "40000",
        "--json",
    ])
    .unwrap();

    match cli.command {
        Commands::Plan(args) => {
            assert_eq!(args.credits, Some(40_000));
        }
        _ => panic!("Wrong top-level command"),
    }
    assert!(cli.json, "--json is global");
}

#[test]
fn test_parse_config_commands() {
    let cli = Cli::try_parse_from(vec!["flotilla", "--config", "custom.yaml", "config", "validate"]).unwrap();
    assert_eq!(cli.config, Some(PathBuf::from("custom.yaml")));
    assert!(matches!(
        cli.command,
        Commands::Config(ref args) if matches!(args.command, ConfigCommand::Validate)
    ));

    let cli = Cli::try_parse_from(vec!["flotilla", "config", "show"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Config(ref args) if matches!(args.command, ConfigCommand::Show)
    ));
}

#[test]
fn test_run_requires_manifest() {
    assert!(Cli::try_parse_from(vec!["flotilla", "run"]).is_err());
    assert!(Cli::try_parse_from(vec!["flotilla", "plan"]).is_err());
}
