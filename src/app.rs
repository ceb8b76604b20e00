use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{error::ErrorKind, Parser};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::args::{CliArgs, Command};
use crate::cli::validation;
use crate::client::{self, ListQuery, RestClient};
use crate::config::{self, ConfigFile, ResourceSpec};
use crate::controller::{Removal, ResourceController};
use crate::list::ClientFilter;
use crate::record::{Draft, ImageRef, Record};
use crate::session::{self, Session, SessionStore};

const DEFAULT_TIMEOUT_SECONDS: usize = 10;

fn format_kv_line(label: &str, value: &str) {
    println!(":: {:<10}: {}", label, value);
}

#[derive(Clone, Debug)]
struct RunConfig {
    base_url: String,
    timeout: usize,
    proxy: Option<String>,
    page_size: usize,
    json: bool,
    no_color: bool,
    session_path: PathBuf,
    resources: Vec<ResourceSpec>,
    command: Command,
}

fn build_run_config(args: CliArgs, cfg: ConfigFile) -> Result<RunConfig, String> {
    validation::validate(&args)?;

    let no_color = args.no_color || cfg.no_color.unwrap_or(false);
    let timeout = args
        .timeout
        .or(cfg.timeout)
        .unwrap_or(DEFAULT_TIMEOUT_SECONDS);
    let page_size = args
        .page_size
        .or(cfg.page_size)
        .unwrap_or(crate::list::DEFAULT_PAGE_SIZE);
    let proxy = args.proxy.or(cfg.proxy).filter(|p| !p.trim().is_empty());

    let base_url = args
        .base_url
        .or(cfg.base_url)
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| {
            "no backend configured; set base_url in the config file or pass --base-url".to_string()
        })?;

    let session_path = match cfg.session_file.as_deref() {
        Some(path) => config::expand_tilde(path),
        None => config::default_session_path()
            .ok_or_else(|| "cannot determine home directory for the session file".to_string())?,
    };

    Ok(RunConfig {
        base_url,
        timeout,
        proxy,
        page_size,
        json: args.json,
        no_color,
        session_path,
        resources: cfg.resources.unwrap_or_default(),
        command: args.command,
    })
}

fn find_resource<'a>(resources: &'a [ResourceSpec], name: &str) -> Result<&'a ResourceSpec, String> {
    if let Some(resource) = resources.iter().find(|r| r.name == name) {
        return Ok(resource);
    }
    let known = resources
        .iter()
        .map(|r| r.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    if known.is_empty() {
        Err(format!(
            "unknown resource '{name}'; declare resources in the config file"
        ))
    } else {
        Err(format!("unknown resource '{name}'; configured: {known}"))
    }
}

fn guard_access(session: &Session, resource: &ResourceSpec) -> Result<(), String> {
    if !session.authenticated {
        return Err("not signed in; run 'opsdesk login --user <ID>' first".to_string());
    }
    if !session.can_access(resource) {
        return Err(format!(
            "role '{}' may not access '{}'",
            session.role.as_deref().unwrap_or("?"),
            resource.name
        ));
    }
    Ok(())
}

fn prompt_line(prompt: &str) -> Result<String, String> {
    eprint!("{prompt}");
    std::io::stderr()
        .flush()
        .map_err(|e| format!("failed to flush prompt: {e}"))?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| format!("failed to read input: {e}"))?;
    Ok(line.trim().to_string())
}

fn confirm_delete(resource: &str, id: &str) -> bool {
    match prompt_line(&format!("delete {resource}/{id}? [y/N] ")) {
        Ok(answer) => matches!(answer.chars().next(), Some('y') | Some('Y')),
        Err(_) => false,
    }
}

fn spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn cell_text(record: &Record, column: &str) -> String {
    let text = match record.get(column) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let flat = text.replace(['\n', '\r'], " ");
    if flat.chars().count() > 32 {
        let truncated: String = flat.chars().take(30).collect();
        format!("{truncated}..")
    } else {
        flat
    }
}

fn render_table(records: &[&Record], id_field: &str) {
    if records.is_empty() {
        println!("{}", "no records".dimmed());
        return;
    }
    let columns = Record::column_set(records, id_field);
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    let mut rows: Vec<Vec<String>> = Vec::with_capacity(records.len());
    for record in records {
        let row: Vec<String> = columns.iter().map(|c| cell_text(record, c)).collect();
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
        rows.push(row);
    }
    let header = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", header.bold());
    println!("{}", "-".repeat(header.chars().count()).dimmed());
    for row in rows {
        let line = row
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect::<Vec<_>>()
            .join("  ");
        println!("{line}");
    }
}

fn render_json(records: &[&Record]) -> Result<(), String> {
    let values: Vec<serde_json::Value> = records.iter().map(|r| r.to_value()).collect();
    let rendered = serde_json::to_string_pretty(&values)
        .map_err(|e| format!("failed to encode records: {e}"))?;
    println!("{rendered}");
    Ok(())
}

fn apply_assignments(draft: &mut Draft, fields: &[String], files: &[String]) -> Result<(), String> {
    for raw in fields {
        let (key, value) = validation::parse_assignment(raw)?;
        draft.set(key, value);
    }
    for raw in files {
        let (key, value) = validation::parse_assignment(raw)?;
        let path = match value {
            serde_json::Value::String(path) => config::expand_tilde(&path),
            _ => return Err(format!("invalid --file '{raw}', expected KEY=PATH")),
        };
        if !path.exists() {
            return Err(format!("file not found: {}", path.display()));
        }
        draft.set_image(key, ImageRef::Pending(path));
    }
    Ok(())
}

fn build_draft(fields: &[String], files: &[String]) -> Result<Draft, String> {
    let mut draft = Draft::new();
    apply_assignments(&mut draft, fields, files)?;
    Ok(draft)
}

#[allow(clippy::too_many_arguments)]
fn build_list_inputs(
    search: Option<String>,
    pattern: Option<String>,
    category: Option<String>,
    from_date: Option<String>,
    to_date: Option<String>,
    page: Option<usize>,
    limit: Option<usize>,
    server: bool,
    resource: &ResourceSpec,
    page_size: usize,
) -> Result<(ListQuery, ClientFilter, usize), String> {
    let from = from_date.as_deref().map(validation::parse_date).transpose()?;
    let to = to_date.as_deref().map(validation::parse_date).transpose()?;
    let display_page = page.unwrap_or(1);
    let pattern = pattern
        .as_deref()
        .map(regex::Regex::new)
        .transpose()
        .map_err(|e| format!("invalid --match: {e}"))?;

    if server {
        // The backend knows nothing about --match; search/dates/category go
        // over the wire and the regex narrows the returned page locally.
        let query = ListQuery {
            page: Some(display_page),
            limit: Some(limit.unwrap_or(page_size)),
            search,
            from_date: from,
            to_date: to,
            category,
        };
        let filter = ClientFilter {
            pattern,
            ..ClientFilter::default()
        };
        return Ok((query, filter, display_page));
    }

    let filter = ClientFilter {
        search,
        pattern,
        category,
        from_date: from,
        to_date: to,
        date_field: resource.date_field.clone(),
    };
    Ok((ListQuery::default(), filter, display_page))
}

async fn run_list(
    run: &RunConfig,
    client: RestClient,
    session: &Session,
    resource_name: &str,
    query: ListQuery,
    filter: ClientFilter,
    display_page: usize,
) -> Result<(), String> {
    let resource = find_resource(&run.resources, resource_name)?;
    guard_access(session, resource)?;

    let mut controller = ResourceController::new(client, resource.clone(), run.page_size);
    let bar = spinner(format!("loading {}", resource.name));
    let outcome = controller.load(query).await;
    bar.finish_and_clear();
    outcome.map_err(|e| e.to_string())?;

    controller.set_filter(filter);
    controller.set_page(display_page);

    let page_records = controller.page_records();
    if run.json {
        render_json(&page_records)?;
    } else {
        format_kv_line("resource", &resource.name);
        render_table(&page_records, &resource.id_field);
        println!(
            "{}",
            format!(
                ":: page {}/{} :: {} record(s) shown",
                controller.page(),
                controller.total_pages().max(1),
                page_records.len()
            )
            .dimmed()
        );
    }
    Ok(())
}

async fn run_async(run: RunConfig) -> Result<(), String> {
    let http =
        client::build_http_client(run.timeout, run.proxy.as_deref()).map_err(|e| e.to_string())?;
    let store = SessionStore::new(run.session_path.clone());
    let session = store.init();
    let client = RestClient::new(http.clone(), &run.base_url, session.token.clone())
        .map_err(|e| e.to_string())?;

    match run.command.clone() {
        Command::Login { user } => {
            let password = prompt_line(&format!("password for {user}: "))?;
            if password.is_empty() {
                return Err("empty password".to_string());
            }
            let session = session::login(&http, client.base_url(), &user, &password)
                .await
                .map_err(|e| e.to_string())?;
            store.save(&session)?;
            format_kv_line("signed in", &user);
            format_kv_line("role", session.role.as_deref().unwrap_or("(none)"));
        }
        Command::Logout => {
            store.clear()?;
            println!(":: signed out");
        }
        Command::Resources => {
            if run.resources.is_empty() {
                println!("{}", "no resources configured".dimmed());
            }
            for resource in &run.resources {
                let roles = if resource.roles.is_empty() {
                    "any".to_string()
                } else {
                    resource.roles.join(", ")
                };
                println!(
                    ":: {:<16} path={} upload={:?} roles={}",
                    resource.name.bold(),
                    resource.collection_path(),
                    resource.upload,
                    roles
                );
            }
        }
        Command::List {
            resource,
            search,
            pattern,
            category,
            from_date,
            to_date,
            page,
            limit,
            server,
        } => {
            let spec = find_resource(&run.resources, &resource)?.clone();
            let (query, filter, display_page) = build_list_inputs(
                search,
                pattern,
                category,
                from_date,
                to_date,
                page,
                limit,
                server,
                &spec,
                run.page_size,
            )?;
            run_list(
                &run,
                client,
                &session,
                &resource,
                query,
                filter,
                display_page,
            )
            .await?;
        }
        Command::Create {
            resource,
            fields,
            files,
        } => {
            let spec = find_resource(&run.resources, &resource)?.clone();
            guard_access(&session, &spec)?;
            let draft = build_draft(&fields, &files)?;
            let mut controller = ResourceController::new(client, spec, run.page_size);
            let bar = spinner(format!("creating {resource} record"));
            let result = controller.create(&draft).await;
            bar.finish_and_clear();
            result.map_err(|e| e.to_string())?;
            println!(":: created :: {} now holds {} record(s)", resource, controller.records().len());
        }
        Command::Update {
            resource,
            id,
            fields,
            files,
        } => {
            let spec = find_resource(&run.resources, &resource)?.clone();
            guard_access(&session, &spec)?;
            let mut controller = ResourceController::new(client, spec, run.page_size);
            let bar = spinner(format!("loading {resource}"));
            let loaded = controller.load(ListQuery::default()).await;
            bar.finish_and_clear();
            loaded.map_err(|e| e.to_string())?;
            // Edit a copy of the stored record so unmentioned fields survive
            // the PUT; the assignments overwrite on top.
            let mut draft = controller
                .draft_for(&id)
                .ok_or_else(|| format!("no '{resource}' record with id '{id}'"))?;
            apply_assignments(&mut draft, &fields, &files)?;
            let bar = spinner(format!("updating {resource}/{id}"));
            let result = controller.update(&id, &draft).await;
            bar.finish_and_clear();
            result.map_err(|e| e.to_string())?;
            println!(":: updated :: {resource}/{id}");
        }
        Command::Delete { resource, id, yes } => {
            let spec = find_resource(&run.resources, &resource)?.clone();
            guard_access(&session, &spec)?;
            let mut controller = ResourceController::new(client, spec, run.page_size);
            let removal = controller
                .remove(&id, || yes || confirm_delete(&resource, &id))
                .await
                .map_err(|e| e.to_string())?;
            match removal {
                Removal::Deleted => println!(":: deleted :: {resource}/{id}"),
                Removal::Declined => println!(":: kept :: {resource}/{id}"),
            }
        }
    }
    Ok(())
}

fn log_level(verbose: u8) -> log::LevelFilter {
    match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    }
}

pub fn run_cli() -> Result<(), String> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{e}");
                return Ok(());
            }
            _ => return Err(e.to_string()),
        },
    };

    env_logger::Builder::new()
        .filter_level(log_level(args.verbose))
        .parse_default_env()
        .init();

    let cfg = match args.config.as_deref() {
        Some(path) => {
            let path = config::expand_tilde(path);
            config::load_config(&path, false)?
        }
        None => match config::default_config_path() {
            Some(path) => {
                config::ensure_default_config_file(&path)?;
                config::load_config(&path, true)?
            }
            None => ConfigFile::default(),
        },
    };

    let run = build_run_config(args, cfg)?;
    colored::control::set_override(!run.no_color && atty_stdout());

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build runtime: {e}"))?;

    rt.block_on(run_async(run))?;
    Ok(())
}

fn atty_stdout() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal()
}
