use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::activity::{self, ActivityEvent, RequestKind};
use crate::breakdown::edit::EditEnvelope;
use crate::breakdown::reconcile::reconcile_with_report;
use crate::breakdown::{recalculate_aggregates, validate_and_normalize, Validator};
use crate::config::{self, AppConfig};
use crate::documents::Stager;
use crate::model::project::ProjectType;
use crate::oracle::gemini::GeminiOracle;
use crate::service::BreakdownService;

const DEFAULT_HISTORY: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Analyze {
        files: Vec<PathBuf>,
        project_type: ProjectType,
        tech_stack: Vec<String>,
        output: Option<PathBuf>,
    },
    Edit {
        previous: PathBuf,
        query: String,
        output: Option<PathBuf>,
    },
    Validate {
        file: PathBuf,
        project_type: Option<ProjectType>,
        strict: bool,
    },
    Reconcile {
        previous: PathBuf,
        new: PathBuf,
    },
    History {
        limit: usize,
    },
    Help,
}

/// Parse the arguments after the program name.
pub fn parse_args(args: &[String]) -> Result<Command> {
    let Some((command, rest)) = args.split_first() else {
        return Ok(Command::Help);
    };
    match command.as_str() {
        "analyze" => parse_analyze(rest),
        "edit" => parse_edit(rest),
        "validate" => parse_validate(rest),
        "reconcile" => match rest {
            [previous, new] => Ok(Command::Reconcile {
                previous: previous.into(),
                new: new.into(),
            }),
            _ => bail!("Usage: breakdown reconcile <previous.json> <new.json>"),
        },
        "history" => parse_history(rest),
        "help" | "-h" | "--help" => Ok(Command::Help),
        other => bail!("Unknown command '{other}'. Run `breakdown help` for usage."),
    }
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    match args.get(i + 1) {
        Some(value) => Ok(value.as_str()),
        None => bail!("Missing value for {flag}"),
    }
}

fn parse_project_type(raw: &str) -> Result<ProjectType> {
    raw.parse::<ProjectType>().map_err(anyhow::Error::msg)
}

/// Split `"React, Node.js,,"` into `["React", "Node.js"]`.
pub fn parse_tech_stack(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_analyze(args: &[String]) -> Result<Command> {
    let mut files = Vec::new();
    let mut project_type = None;
    let mut tech_stack = Vec::new();
    let mut output = None;
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-t" | "--type" => {
                project_type = Some(parse_project_type(flag_value(args, i, "--type")?)?);
                i += 1;
            }
            "-s" | "--stack" => {
                tech_stack.extend(parse_tech_stack(flag_value(args, i, "--stack")?));
                i += 1;
            }
            "-o" | "--output" => {
                output = Some(PathBuf::from(flag_value(args, i, "--output")?));
                i += 1;
            }
            _ => files.push(PathBuf::from(&args[i])),
        }
        i += 1;
    }

    if files.is_empty() {
        bail!("Usage: breakdown analyze <files...> --type <scrum|kanban|tasks> [--stack \"a,b\"] [-o out.json]");
    }
    let Some(project_type) = project_type else {
        bail!("Missing --type (scrum, kanban or tasks)");
    };
    Ok(Command::Analyze {
        files,
        project_type,
        tech_stack,
        output,
    })
}

fn parse_edit(args: &[String]) -> Result<Command> {
    let mut positional: Vec<&str> = Vec::new();
    let mut output = None;
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-o" | "--output" => {
                output = Some(PathBuf::from(flag_value(args, i, "--output")?));
                i += 1;
            }
            other => positional.push(other),
        }
        i += 1;
    }

    let Some((previous, query)) = positional.split_first() else {
        bail!("Usage: breakdown edit <previous.json> <query...> [-o out.json]");
    };
    let query = query.join(" ");
    if query.trim().is_empty() {
        bail!("Edit query cannot be empty");
    }
    Ok(Command::Edit {
        previous: PathBuf::from(previous),
        query,
        output,
    })
}

fn parse_validate(args: &[String]) -> Result<Command> {
    let mut file = None;
    let mut project_type = None;
    let mut strict = false;
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-t" | "--type" => {
                project_type = Some(parse_project_type(flag_value(args, i, "--type")?)?);
                i += 1;
            }
            "--strict" => strict = true,
            other if file.is_none() => file = Some(PathBuf::from(other)),
            other => bail!("Unexpected argument '{other}'"),
        }
        i += 1;
    }

    let Some(file) = file else {
        bail!("Usage: breakdown validate <file.json> [--type <scrum|kanban|tasks>] [--strict]");
    };
    Ok(Command::Validate {
        file,
        project_type,
        strict,
    })
}

fn parse_history(args: &[String]) -> Result<Command> {
    let limit = match args {
        [] => DEFAULT_HISTORY,
        [flag, value] if flag == "-n" || flag == "--limit" => value
            .parse()
            .with_context(|| format!("Invalid history limit '{value}'"))?,
        _ => bail!("Usage: breakdown history [-n <count>]"),
    };
    Ok(Command::History { limit })
}

pub async fn run(command: Command) -> Result<()> {
    match command {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::History { limit } => {
            print_history(&activity::read_events(&activity::log_path(), Some(limit)));
            Ok(())
        }
        Command::Validate {
            file,
            project_type,
            strict,
        } => {
            let raw = read_json(&file)?;
            let project = Validator::new()
                .expecting(project_type)
                .strict_mapping(strict)
                .validate(&raw)
                .with_context(|| format!("{} is not a valid breakdown", file.display()))?;
            write_json(&recalculate_aggregates(project), None)
        }
        Command::Reconcile { previous, new } => {
            let previous = validate_and_normalize(&read_json(&previous)?, None)
                .with_context(|| format!("{} is not a valid breakdown", previous.display()))?;
            let new = validate_and_normalize(&read_json(&new)?, Some(previous.project_type()))
                .with_context(|| format!("{} is not a valid breakdown", new.display()))?;
            let (project, report) = reconcile_with_report(&previous, new);
            eprintln!(
                "preserved {}, inserted {}, dropped {}",
                report.preserved, report.inserted, report.dropped
            );
            write_json(&project, None)
        }
        Command::Analyze {
            files,
            project_type,
            tech_stack,
            output,
        } => {
            let config = config::load_config()?;
            run_analyze(&config, &files, project_type, &tech_stack, output.as_deref()).await
        }
        Command::Edit {
            previous,
            query,
            output,
        } => {
            let config = config::load_config()?;
            run_edit(&config, &previous, &query, output.as_deref()).await
        }
    }
}

fn build_service(config: &AppConfig) -> Result<BreakdownService> {
    let oracle = GeminiOracle::from_config(&config.oracle)?;
    Ok(BreakdownService::new(Box::new(oracle)).strict_mapping(config.validation.strict_mapping))
}

async fn run_analyze(
    config: &AppConfig,
    files: &[PathBuf],
    project_type: ProjectType,
    tech_stack: &[String],
    output: Option<&Path>,
) -> Result<()> {
    let service = build_service(config)?;
    let mut event = activity::new_event(RequestKind::Analyze, false);
    event.project_type = Some(project_type.to_string());
    event.model = Some(service.model().to_string());

    let scratch = std::env::temp_dir().join(format!("breakdown-{}", std::process::id()));
    let stager = Stager::from_config(&config.documents, &scratch);
    let result = async {
        let documents = stager.stage(files).await?;
        let generated = service.analyze(&documents, project_type, tech_stack).await?;
        anyhow::Ok(generated)
    }
    .await;
    if scratch.exists() {
        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            tracing::warn!(dir = %scratch.display(), error = %e, "failed to remove scratch directory");
        }
    }

    match result {
        Ok(generated) => {
            event.success = true;
            event.total_tokens = generated.meta.token_usage.total_tokens;
            event.message = Some(format!(
                "{} task(s), {} hour(s)",
                generated.project.items().count(),
                generated.meta.total_estimate_hours
            ));
            record(&event);
            write_json(&generated, output)
        }
        Err(e) => {
            event.message = Some(e.to_string());
            record(&event);
            Err(e.context("Analysis failed"))
        }
    }
}

async fn run_edit(config: &AppConfig, previous: &Path, query: &str, output: Option<&Path>) -> Result<()> {
    let previous_raw = read_json(previous)?;
    let service = build_service(config)?;
    let mut event = activity::new_event(RequestKind::Edit, false);
    event.model = Some(service.model().to_string());

    let (envelope, usage) = match service.edit_with_usage(&previous_raw, query).await {
        Ok(outcome) => outcome,
        Err(e) => {
            event.message = Some(e.kind().to_string());
            record(&event);
            return Err(anyhow::Error::new(e).context("Edit failed"));
        }
    };
    event.total_tokens = usage.total_tokens;

    match &envelope {
        EditEnvelope::Applied(report) => {
            event.success = true;
            event.project_type = Some(report.updated_json.project_type().to_string());
            event.message = Some(format!(
                "{} added, {} updated, {} deleted",
                report.added.len(),
                report.updated.len(),
                report.deleted.len()
            ));
            record(&event);
            write_json(&envelope, output)
        }
        EditEnvelope::Rejected(rejection) => {
            event.message = Some(rejection.kind.to_string());
            record(&event);
            write_json(&envelope, None)?;
            bail!("Edit rejected ({}): {}", rejection.kind, rejection.error)
        }
    }
}

/// Activity logging never fails a request.
fn record(event: &ActivityEvent) {
    if let Err(e) = activity::append_event(&activity::log_path(), event) {
        tracing::warn!(error = %e, "failed to write activity log");
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn print_history(events: &[ActivityEvent]) {
    if events.is_empty() {
        println!("No requests recorded yet.");
        return;
    }
    for event in events {
        let request = match event.request {
            RequestKind::Analyze => "analyze",
            RequestKind::Edit => "edit",
        };
        let tokens = event
            .total_tokens
            .map(|t| format!("{t} tokens"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<7}  {:<6}  {:<12}  {}",
            event.timestamp,
            request,
            if event.success { "ok" } else { "failed" },
            tokens,
            event.message.as_deref().unwrap_or("")
        );
    }
}

pub fn print_help() {
    println!("breakdown: turn requirement documents into tasks and keep them consistent\n");
    println!("USAGE:");
    println!("  breakdown analyze <files...> --type <scrum|kanban|tasks> [--stack \"a,b\"] [-o out.json]");
    println!("  breakdown edit <previous.json> <query...> [-o out.json]");
    println!("  breakdown validate <file.json> [--type <scrum|kanban|tasks>] [--strict]");
    println!("  breakdown reconcile <previous.json> <new.json>");
    println!("  breakdown history [-n <count>]");
    println!();
    println!("Documents must be .pdf or .docx (converted with LibreOffice).");
    println!("The oracle key is read from GOOGLE_GENAI_API_KEY or ~/.breakdown/config.toml.");
    println!("Set BREAKDOWN_LOG=debug for verbose logs.");
    println!();
    println!("EXAMPLES:");
    println!("  breakdown analyze frs.pdf design.docx --type scrum --stack \"React, Node.js\"");
    println!("  breakdown edit plan.json add a sub-task for password reset, 1 hour -o plan.json");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_args_is_help() {
        assert_eq!(parse_args(&[]).unwrap(), Command::Help);
        assert_eq!(parse_args(&args(&["--help"])).unwrap(), Command::Help);
    }

    #[test]
    fn parse_analyze_with_flags() {
        let cmd = parse_args(&args(&[
            "analyze",
            "frs.pdf",
            "--type",
            "Scrum",
            "design.docx",
            "--stack",
            "React, Node.js,",
            "-o",
            "out.json",
        ]))
        .unwrap();
        assert_eq!(
            cmd,
            Command::Analyze {
                files: vec!["frs.pdf".into(), "design.docx".into()],
                project_type: ProjectType::Scrum,
                tech_stack: vec!["React".into(), "Node.js".into()],
                output: Some("out.json".into()),
            }
        );
    }

    #[test]
    fn analyze_requires_type_and_files() {
        let err = parse_args(&args(&["analyze", "frs.pdf"])).unwrap_err();
        assert!(err.to_string().contains("--type"));

        let err = parse_args(&args(&["analyze", "--type", "kanban"])).unwrap_err();
        assert!(err.to_string().contains("Usage"));

        let err = parse_args(&args(&["analyze", "a.pdf", "--type", "waterfall"])).unwrap_err();
        assert!(err.to_string().contains("unknown project type"));
    }

    #[test]
    fn parse_edit_joins_query_words() {
        let cmd = parse_args(&args(&[
            "edit",
            "plan.json",
            "add",
            "a password reset sub-task",
            "-o",
            "next.json",
        ]))
        .unwrap();
        assert_eq!(
            cmd,
            Command::Edit {
                previous: "plan.json".into(),
                query: "add a password reset sub-task".into(),
                output: Some("next.json".into()),
            }
        );
    }

    #[test]
    fn edit_needs_a_query() {
        let err = parse_args(&args(&["edit", "plan.json"])).unwrap_err();
        assert!(err.to_string().contains("empty"));
        let err = parse_args(&args(&["edit", "plan.json", "-o"])).unwrap_err();
        assert!(err.to_string().contains("Missing value"));
    }

    #[test]
    fn parse_validate_and_reconcile() {
        assert_eq!(
            parse_args(&args(&["validate", "plan.json", "--strict", "-t", "tasks"])).unwrap(),
            Command::Validate {
                file: "plan.json".into(),
                project_type: Some(ProjectType::TaskOnly),
                strict: true,
            }
        );
        assert!(parse_args(&args(&["validate", "a.json", "b.json"])).is_err());
        assert_eq!(
            parse_args(&args(&["reconcile", "old.json", "new.json"])).unwrap(),
            Command::Reconcile {
                previous: "old.json".into(),
                new: "new.json".into(),
            }
        );
        assert!(parse_args(&args(&["reconcile", "old.json"])).is_err());
    }

    #[test]
    fn parse_history_limit() {
        assert_eq!(
            parse_args(&args(&["history"])).unwrap(),
            Command::History {
                limit: DEFAULT_HISTORY
            }
        );
        assert_eq!(
            parse_args(&args(&["history", "-n", "5"])).unwrap(),
            Command::History { limit: 5 }
        );
        assert!(parse_args(&args(&["history", "-n", "many"])).is_err());
    }

    #[test]
    fn unknown_command_fails() {
        let err = parse_args(&args(&["deploy"])).unwrap_err();
        assert!(err.to_string().contains("Unknown command 'deploy'"));
    }

    #[test]
    fn tech_stack_trims_and_drops_blanks() {
        assert_eq!(parse_tech_stack(" Rust ,, Postgres "), vec!["Rust", "Postgres"]);
        assert!(parse_tech_stack(" , ").is_empty());
    }

    #[test]
    fn read_and_write_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        write_json(&serde_json::json!({"tasks": []}), Some(&path)).unwrap();
        assert!(read_json(&path).unwrap()["tasks"].is_array());

        std::fs::write(&path, "{ nope").unwrap();
        let err = read_json(&path).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }
}
