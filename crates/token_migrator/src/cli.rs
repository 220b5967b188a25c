use clap::{Parser, Subcommand};

use crate::backup::{RestoreArgs, run_restore};
use crate::config::{ListRulesArgs, run_list_rules};
use crate::error::Result;
use crate::runner::{RunArgs, run_migration};
use crate::scan::{ScanArgs, run_scan};

#[derive(Debug, Parser)]
#[command(
    name = "token_migrator",
    about = "Batch migration of literal style values to design tokens",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
#[allow(clippy::large_enum_variant)]
pub enum Commands {
    /// Rewrite one batch window of candidate files, then run the compile gate.
    Run(RunArgs),

    /// Report remaining literals without touching any file.
    Scan(ScanArgs),

    /// Write every backup of a snapshot manifest back over its original.
    Restore(RestoreArgs),

    /// Print rule sets, their rules and mapping counts.
    #[command(name = "list-rules")]
    ListRules(ListRulesArgs),
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => run_migration(args),
        Commands::Scan(args) => run_scan(args),
        Commands::Restore(args) => run_restore(args),
        Commands::ListRules(args) => run_list_rules(args),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;
    use tempfile::tempdir;

    use crate::backup::RestoreArgs;
    use crate::config::{ListRulesArgs, ProjectArgs};
    use crate::error::MigrateError;
    use crate::runner::{DEFAULT_BATCH_SIZE, RunArgs};

    use super::{Cli, Commands, run};

    fn project(root: PathBuf) -> ProjectArgs {
        ProjectArgs {
            root,
            out_dir: None,
            config: None,
            backup_dir: None,
            exclude: Vec::new(),
        }
    }

    fn run_args(rule_set: &str, root: PathBuf) -> RunArgs {
        RunArgs {
            rule_set: rule_set.to_string(),
            start: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            source: None,
            glob: None,
            project: project(root),
            gate_command: None,
            gate_timeout: None,
            skip_gate: true,
            dry_run: false,
            no_backup: false,
            refresh_backups: false,
        }
    }

    #[test]
    fn list_rules_command_dispatches_successfully() {
        let result = run(Cli {
            command: Commands::ListRules(ListRulesArgs { config: None }),
        });
        assert!(result.is_ok());
    }

    #[test]
    fn run_command_dispatches_unknown_rule_set_error() {
        let temp = tempdir().expect("tempdir");
        let error = run(Cli {
            command: Commands::Run(run_args("shadow", temp.path().to_path_buf())),
        })
        .expect_err("unknown rule set");
        assert!(matches!(&error, MigrateError::UnknownRuleSet { name } if name == "shadow"));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn run_command_dispatches_missing_root_error() {
        let error = run(Cli {
            command: Commands::Run(run_args(
                "size",
                PathBuf::from("/tmp/token_migrator/does-not-exist"),
            )),
        })
        .expect_err("missing root");
        assert!(matches!(error, MigrateError::MissingPath { .. }));
    }

    #[test]
    fn run_command_rejects_zero_batch_size() {
        let temp = tempdir().expect("tempdir");
        let mut args = run_args("size", temp.path().to_path_buf());
        args.batch_size = 0;
        let error = run(Cli {
            command: Commands::Run(args),
        })
        .expect_err("zero batch");
        assert!(matches!(error, MigrateError::InvalidArgument { .. }));
    }

    #[test]
    fn restore_command_dispatches_missing_manifest_error() {
        let temp = tempdir().expect("tempdir");
        let error = run(Cli {
            command: Commands::Restore(RestoreArgs {
                manifest: None,
                project: project(temp.path().to_path_buf()),
            }),
        })
        .expect_err("no manifest");
        assert!(matches!(error, MigrateError::MissingPath { .. }));
    }

    #[test]
    fn parser_accepts_run_flags() {
        let cli = Cli::try_parse_from([
            "token_migrator",
            "run",
            "spacing",
            "--start",
            "40",
            "--batch-size",
            "10",
            "--glob",
            "src/**/*.vue",
            "--exclude",
            "/legacy/",
            "--gate-command",
            "npm run type-check",
            "--gate-timeout",
            "5m",
            "--refresh-backups",
        ])
        .expect("parse");

        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.rule_set, "spacing");
        assert_eq!(args.start, 40);
        assert_eq!(args.batch_size, 10);
        assert_eq!(args.glob.as_deref(), Some("src/**/*.vue"));
        assert_eq!(args.project.exclude, vec!["/legacy/".to_string()]);
        assert_eq!(args.project.root, PathBuf::from("."));
        assert!(args.refresh_backups);
        assert!(!args.skip_gate);
    }

    #[test]
    fn parser_rejects_source_with_glob() {
        let result = Cli::try_parse_from([
            "token_migrator",
            "run",
            "size",
            "--source",
            "issues.json",
            "--glob",
            "**/*.vue",
        ]);
        assert!(result.is_err());
    }
}
