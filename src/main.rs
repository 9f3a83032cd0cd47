use clap::Parser;
use secretctl::cli::commands::{restore_cmd::RestoreArgs, run::RunArgs, set::SetArgs};
use secretctl::cli::{AuditAction, Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => secretctl::cli::commands::init::execute(&cli),
        Commands::Set {
            ref key,
            ref value,
            ref fields,
            ref sensitive,
            ref bindings,
            ref tags,
            ref notes,
            ref url,
            ref expires,
            force,
        } => secretctl::cli::commands::set::execute(
            &cli,
            &SetArgs {
                key,
                value: value.as_deref(),
                fields,
                sensitive,
                bindings,
                tags,
                notes: notes.as_deref(),
                url: url.as_deref(),
                expires: expires.as_deref(),
                force,
            },
        ),
        Commands::Get {
            ref key,
            ref field,
            masked,
        } => secretctl::cli::commands::get::execute(&cli, key, field.as_deref(), masked),
        Commands::List { ref tag } => {
            secretctl::cli::commands::list::execute(&cli, tag.as_deref())
        }
        Commands::Delete { ref key, force } => {
            secretctl::cli::commands::delete::execute(&cli, key, force)
        }
        Commands::Run {
            ref keys,
            ref env_prefix,
            ref env,
            timeout,
            no_sanitize,
            ref command,
        } => secretctl::cli::commands::run::execute(
            &cli,
            &RunArgs {
                keys,
                env_prefix,
                env: env.as_deref(),
                timeout,
                no_sanitize,
                command,
            },
        ),
        Commands::Generate {
            ref key,
            length,
            no_symbols,
            force,
        } => secretctl::cli::commands::generate::execute(&cli, key, length, no_symbols, force),
        Commands::RotatePassword => secretctl::cli::commands::rotate::execute(&cli),
        Commands::Audit { ref action } => match action {
            AuditAction::List {
                action,
                source,
                key,
                success,
                last,
            } => secretctl::cli::commands::audit_cmd::execute_list(
                &cli,
                action.as_deref(),
                source.as_deref(),
                key.as_deref(),
                *success,
                *last,
            ),
            AuditAction::Verify => secretctl::cli::commands::audit_cmd::execute_verify(&cli),
            AuditAction::Export {
                format,
                output,
                action,
                source,
            } => secretctl::cli::commands::audit_cmd::execute_export(
                &cli,
                format,
                output.as_deref(),
                action.as_deref(),
                source.as_deref(),
            ),
            AuditAction::Prune { before } => {
                secretctl::cli::commands::audit_cmd::execute_prune(&cli, before)
            }
        },
        Commands::Backup {
            ref output,
            ref key_file,
            generate_key,
            include_audit,
        } => secretctl::cli::commands::backup_cmd::execute(
            &cli,
            output,
            key_file.as_deref(),
            generate_key,
            include_audit,
        ),
        Commands::Restore {
            ref input,
            ref target,
            ref key_file,
            verify_only,
            dry_run,
            on_conflict,
            with_audit,
        } => secretctl::cli::commands::restore_cmd::execute(
            &cli,
            &RestoreArgs {
                input,
                target: target.as_deref(),
                key_file: key_file.as_deref(),
                verify_only,
                dry_run,
                on_conflict,
                with_audit,
            },
        ),
        Commands::Security => secretctl::cli::commands::security::execute(&cli),
        Commands::McpServer => secretctl::cli::commands::mcp_server::execute(&cli),
        Commands::Completions { ref shell } => {
            secretctl::cli::commands::completions::execute(shell)
        }
    };

    if let Err(e) = result {
        secretctl::cli::output::error(&e.to_string());
        std::process::exit(e.exit_code());
    }
}
