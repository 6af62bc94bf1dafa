use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing::error;

use jobtrail::config::{self, Settings};
use jobtrail::models::{ApplicationStatus, NewApplication, StageInstance, Tenant};
use jobtrail::{Database, StageEngine, TrackError};

#[derive(Parser)]
#[command(name = "jobtrail")]
#[command(about = "Job application tracking - stages, history, and pipeline status")]
struct Cli {
    /// Database file (defaults to the user data directory)
    #[arg(long, global = true, env = "JOBTRAIL_DB")]
    db: Option<PathBuf>,

    /// Account the records belong to (defaults to $USER)
    #[arg(long, global = true, env = "JOBTRAIL_USER")]
    user: Option<String>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// More log output (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage companies
    Company {
        #[command(subcommand)]
        command: CompanyCommands,
    },

    /// Manage job postings
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Manage resumes
    Resume {
        #[command(subcommand)]
        command: ResumeCommands,
    },

    /// Manage reusable stage templates
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },

    /// Manage applications
    App {
        #[command(subcommand)]
        command: AppCommands,
    },

    /// Move an application through its stages
    Stage {
        #[command(subcommand)]
        command: StageCommands,
    },
}

#[derive(Subcommand)]
enum CompanyCommands {
    /// List companies with their derived status
    List,

    /// Add a company
    Add {
        /// Company name
        name: String,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Add a job posting
    Add {
        /// Job title
        title: String,

        /// Hiring company
        #[arg(short, long)]
        company: Option<String>,

        /// Posting URL
        #[arg(short, long)]
        url: Option<String>,
    },

    /// List job postings
    List,
}

#[derive(Subcommand)]
enum ResumeCommands {
    /// Add a resume
    Add {
        /// Title for this resume
        title: String,

        /// Path to resume file
        file: PathBuf,
    },

    /// List resumes
    List,
}

#[derive(Subcommand)]
enum TemplateCommands {
    /// Add a stage template
    Add {
        /// Stage name (e.g. "Applied")
        name: String,

        /// Display order
        #[arg(short, long, default_value = "0")]
        order: i64,
    },

    /// List stage templates
    List,

    /// Rename or reorder a template
    Update {
        /// Template ID
        id: i64,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long)]
        order: Option<i64>,
    },

    /// Delete a template (existing stages keep their history)
    Delete {
        /// Template ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum AppCommands {
    /// Start tracking an application for a job
    Add {
        /// Job ID
        job_id: i64,

        /// Resume ID used for this application
        #[arg(short, long)]
        resume: Option<i64>,

        /// Name (defaults to the job title)
        #[arg(short, long)]
        name: Option<String>,

        /// Initial status (active, on_hold, rejected, offer, archived)
        #[arg(short, long)]
        status: Option<String>,

        /// When you applied (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_timestamp)]
        applied_at: Option<DateTime<Utc>>,
    },

    /// List applications
    List {
        /// Filter by status (active, on_hold, rejected, offer, archived)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show an application with its stages and notes
    Show {
        /// Application ID
        id: i64,
    },

    /// Set the application's outcome status
    Status {
        /// Application ID
        id: i64,

        /// New status (active, on_hold, rejected, offer, archived)
        status: String,
    },

    /// Rename an application (blank restores the job title)
    Rename {
        /// Application ID
        id: i64,

        name: String,
    },

    /// Delete an application and its stage history
    Delete {
        /// Application ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum StageCommands {
    /// Append a stage and make it current, closing the previous one
    Append {
        /// Application ID
        app_id: i64,

        /// Template name or ID
        template: String,

        /// Note to attach to the new stage
        #[arg(short, long)]
        note: Option<String>,
    },

    /// List an application's stages
    List {
        /// Application ID
        app_id: i64,
    },

    /// Set a stage's status (pending, active, completed, skipped, cancelled)
    Status {
        app_id: i64,
        stage_id: i64,
        status: String,

        /// Explicit completion time (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_timestamp)]
        completed_at: Option<DateTime<Utc>>,
    },

    /// Mark a stage completed
    Complete {
        app_id: i64,
        stage_id: i64,

        /// Completion time (RFC 3339 or YYYY-MM-DD), defaults to now
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<DateTime<Utc>>,
    },

    /// Delete a stage; the current stage is recomputed if needed
    Delete { app_id: i64, stage_id: i64 },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    config::init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(track) = err.downcast_ref::<TrackError>() {
                if let TrackError::Internal(source) = track {
                    error!(error = %source, "internal failure");
                }
                eprintln!("error[{}]: {}", track.code(), track.public_message());
            } else {
                eprintln!("Error: {:#}", err);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::resolve(cli.db, cli.user)?;
    let db = Database::open(&settings.db_path)
        .with_context(|| format!("Failed to open database at {}", settings.db_path.display()))?;
    let tenant = &settings.tenant;
    let json = cli.json;

    if !matches!(cli.command, Commands::Init) {
        db.ensure_initialized()?;
    }

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", settings.db_path.display());
        }

        Commands::Company { command } => match command {
            CompanyCommands::List => {
                let summaries = db.company_summaries(tenant)?;
                if json {
                    return print_json(&summaries);
                }
                if summaries.is_empty() {
                    println!("No companies found.");
                } else {
                    println!("{:<6} {:<30} {:<13} {:>5} {:>7} {:>7}", "ID", "NAME", "STATUS", "APPS", "ACTIVE", "STAGES");
                    println!("{}", "-".repeat(73));
                    for s in summaries {
                        println!(
                            "{:<6} {:<30} {:<13} {:>5} {:>7} {:>7}",
                            s.company.id,
                            truncate(&s.company.name, 28),
                            s.derived_status,
                            s.counts.applications,
                            s.counts.active_applications,
                            s.counts.max_stages
                        );
                    }
                }
            }

            CompanyCommands::Add { name } => {
                let id = db.get_or_create_company(tenant, &name)?;
                println!("Company '{}' (ID: {})", name.trim(), id);
            }
        },

        Commands::Job { command } => match command {
            JobCommands::Add {
                title,
                company,
                url,
            } => {
                let id = db.add_job(tenant, company.as_deref(), &title, url.as_deref())?;
                println!("Added job #{}", id);
            }

            JobCommands::List => {
                let jobs = db.list_jobs(tenant)?;
                if json {
                    return print_json(&jobs);
                }
                if jobs.is_empty() {
                    println!("No jobs found.");
                } else {
                    println!("{:<6} {:<36} {:<24}", "ID", "TITLE", "COMPANY");
                    println!("{}", "-".repeat(66));
                    for job in jobs {
                        println!(
                            "{:<6} {:<36} {:<24}",
                            job.id,
                            truncate(&job.title, 34),
                            truncate(&job.company_name.unwrap_or_default(), 22)
                        );
                    }
                }
            }
        },

        Commands::Resume { command } => match command {
            ResumeCommands::Add { title, file } => {
                let content = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read resume file: {}", file.display()))?;
                let id = db.add_resume(tenant, &title, &content)?;
                println!("Added resume '{}' (ID: {})", title, id);
            }

            ResumeCommands::List => {
                let resumes = db.list_resumes(tenant)?;
                if json {
                    return print_json(&resumes);
                }
                if resumes.is_empty() {
                    println!("No resumes found.");
                } else {
                    println!("{:<6} {:<30} {:<20}", "ID", "TITLE", "CREATED");
                    println!("{}", "-".repeat(58));
                    for resume in resumes {
                        println!(
                            "{:<6} {:<30} {:<20}",
                            resume.id,
                            truncate(&resume.title, 28),
                            resume.created_at
                        );
                    }
                }
            }
        },

        Commands::Template { command } => match command {
            TemplateCommands::Add { name, order } => {
                let template = db.create_template(tenant, &name, order)?;
                println!("Added stage template '{}' (ID: {})", template.name, template.id);
            }

            TemplateCommands::List => {
                let templates = db.list_templates(tenant)?;
                if json {
                    return print_json(&templates);
                }
                if templates.is_empty() {
                    println!("No stage templates found.");
                } else {
                    println!("{:<6} {:>6} {:<30}", "ID", "ORDER", "NAME");
                    println!("{}", "-".repeat(44));
                    for t in templates {
                        println!("{:<6} {:>6} {:<30}", t.id, t.order, truncate(&t.name, 28));
                    }
                }
            }

            TemplateCommands::Update { id, name, order } => {
                let template = db.update_template(tenant, id, name.as_deref(), order)?;
                println!(
                    "Updated template #{}: '{}' (order {})",
                    template.id, template.name, template.order
                );
            }

            TemplateCommands::Delete { id } => {
                db.delete_template(tenant, id)?;
                println!("Deleted template #{}", id);
            }
        },

        Commands::App { command } => match command {
            AppCommands::Add {
                job_id,
                resume,
                name,
                status,
                applied_at,
            } => {
                let status = status.as_deref().map(str::parse::<ApplicationStatus>).transpose()?;
                let app = db.create_application(
                    tenant,
                    NewApplication {
                        job_id,
                        resume_id: resume,
                        name,
                        status,
                        applied_at,
                    },
                )?;
                println!("Added application #{} '{}'", app.id, app.name);
            }

            AppCommands::List { status } => {
                let status = status.as_deref().map(str::parse::<ApplicationStatus>).transpose()?;
                let views = db.list_application_views(tenant, status)?;
                if json {
                    return print_json(&views);
                }
                if views.is_empty() {
                    println!("No applications found.");
                } else {
                    println!(
                        "{:<6} {:<10} {:<13} {:<28} {:<18} {:<16}",
                        "ID", "STATUS", "PIPELINE", "NAME", "COMPANY", "STAGE"
                    );
                    println!("{}", "-".repeat(96));
                    for view in views {
                        let stage = view
                            .current_stage
                            .as_ref()
                            .map(stage_label)
                            .unwrap_or_else(|| "-".to_string());
                        println!(
                            "{:<6} {:<10} {:<13} {:<28} {:<18} {:<16}",
                            view.application.id,
                            view.application.status,
                            view.derived_status,
                            truncate(&view.application.name, 26),
                            truncate(&view.company_name.clone().unwrap_or_default(), 16),
                            truncate(&stage, 16)
                        );
                    }
                }
            }

            AppCommands::Show { id } => show_application(&db, tenant, id, json)?,

            AppCommands::Status { id, status } => {
                let app = db.set_application_status(tenant, id, &status)?;
                println!("Application #{} is now {}", app.id, app.status);
            }

            AppCommands::Rename { id, name } => {
                let app = db.rename_application(tenant, id, &name)?;
                println!("Application #{} renamed to '{}'", app.id, app.name);
            }

            AppCommands::Delete { id } => {
                db.delete_application(tenant, id)?;
                println!("Deleted application #{}", id);
            }
        },

        Commands::Stage { command } => {
            let engine = StageEngine::new(&db);
            match command {
                StageCommands::Append {
                    app_id,
                    template,
                    note,
                } => {
                    let template_id = resolve_template(&db, tenant, &template)?;
                    let stage = engine.append_stage(tenant, app_id, template_id, note.as_deref())?;
                    print_stage(json, "Appended", &stage)?;
                }

                StageCommands::List { app_id } => {
                    let stages = engine.list_stages(tenant, app_id)?;
                    if json {
                        return print_json(&stages);
                    }
                    let current = db.get_application(tenant, app_id)?.current_stage_id;
                    print_stage_table(&stages, current);
                }

                StageCommands::Status {
                    app_id,
                    stage_id,
                    status,
                    completed_at,
                } => {
                    let stage =
                        engine.update_stage_status(tenant, app_id, stage_id, &status, completed_at)?;
                    print_stage(json, "Updated", &stage)?;
                }

                StageCommands::Complete {
                    app_id,
                    stage_id,
                    at,
                } => {
                    let stage = engine.complete_stage(tenant, app_id, stage_id, at)?;
                    print_stage(json, "Completed", &stage)?;
                }

                StageCommands::Delete { app_id, stage_id } => {
                    engine.delete_stage(tenant, app_id, stage_id)?;
                    let current = db.get_application(tenant, app_id)?.current_stage_id;
                    match current {
                        Some(id) => println!("Deleted stage #{}; current stage is now #{}", stage_id, id),
                        None => println!("Deleted stage #{}; no current stage", stage_id),
                    }
                }
            }
        }
    }

    Ok(())
}

fn show_application(db: &Database, tenant: &Tenant, id: i64, json: bool) -> Result<()> {
    let view = db.application_view(tenant, id)?;
    let stages = StageEngine::new(db).list_stages(tenant, id)?;
    let comments = db.list_comments(tenant, id)?;

    if json {
        return print_json(&serde_json::json!({
            "application": view,
            "stages": stages,
            "comments": comments,
        }));
    }

    let app = &view.application;
    println!("Application #{}", app.id);
    println!("Name: {}", app.name);
    if let Some(title) = &view.job_title {
        println!("Job: #{} {}", app.job_id, title);
    }
    if let Some(company) = &view.company_name {
        println!("Company: {}", company);
    }
    match (&app.resume_id, &view.resume_title) {
        (Some(_), Some(title)) => println!("Resume: {}", title),
        (Some(rid), None) => println!("Resume: #{} (unavailable)", rid),
        _ => {}
    }
    println!("Status: {} ({})", app.status, view.derived_status);
    println!("Applied: {}", app.applied_at.format("%Y-%m-%d"));

    if !stages.is_empty() {
        println!("\nStages ({}):", stages.len());
        print_stage_table(&stages, app.current_stage_id);
    }

    if !comments.is_empty() {
        println!("\nNotes:");
        for comment in comments {
            let stage = comment
                .stage_id
                .map(|s| format!(" [stage #{}]", s))
                .unwrap_or_default();
            println!("  {}{}", comment.created_at.format("%Y-%m-%d %H:%M"), stage);
            for line in textwrap::fill(&comment.content, 70).lines() {
                println!("    {}", line);
            }
        }
    }
    Ok(())
}

fn print_stage_table(stages: &[StageInstance], current: Option<i64>) {
    if stages.is_empty() {
        println!("No stages yet.");
        return;
    }
    println!(
        "  {:<6} {:>5} {:<20} {:<10} {:<17} {:<17}",
        "ID", "ORDER", "STAGE", "STATUS", "STARTED", "COMPLETED"
    );
    println!("  {}", "-".repeat(80));
    for stage in stages {
        let marker = if Some(stage.id) == current { "*" } else { " " };
        println!(
            "{} {:<6} {:>5} {:<20} {:<10} {:<17} {:<17}",
            marker,
            stage.id,
            stage.order,
            truncate(&stage_label(stage), 18),
            stage.status,
            stage.started_at.format("%Y-%m-%d %H:%M"),
            stage
                .completed_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
}

fn print_stage(json: bool, verb: &str, stage: &StageInstance) -> Result<()> {
    if json {
        return print_json(stage);
    }
    println!(
        "{} stage #{} '{}' ({}, order {})",
        verb,
        stage.id,
        stage_label(stage),
        stage.status,
        stage.order
    );
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn stage_label(stage: &StageInstance) -> String {
    stage
        .stage_name
        .clone()
        .unwrap_or_else(|| format!("template #{}", stage.template_id))
}

/// Accepts a template ID or a (case-insensitive) template name.
fn resolve_template(db: &Database, tenant: &Tenant, template: &str) -> Result<i64> {
    if let Ok(id) = template.parse::<i64>() {
        return Ok(id);
    }
    if let Some(t) = db.find_template_by_name(tenant, template)? {
        return Ok(t.id);
    }
    match db.suggest_template_name(tenant, template)? {
        Some(suggestion) => Err(anyhow!(
            "Stage template '{}' not found. Did you mean '{}'?",
            template,
            suggestion
        )),
        None => Err(anyhow!(
            "Stage template '{}' not found. Add it with 'jobtrail template add'.",
            template
        )),
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("'{}' is not an RFC 3339 timestamp or YYYY-MM-DD date", s))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
