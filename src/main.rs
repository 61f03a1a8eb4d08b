use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::debug;

use socialname::check::{Checker, Client, MAX_CONCURRENT_REQUESTS};
use socialname::logging::init_cli_logger;
use socialname::report::{
    Format, RenderOptions, Report, write_footer, write_header, write_master_csv,
    write_report_files, write_result, write_reports,
};
use socialname::site::{Registry, SiteSource};
use socialname::username::validate_username;

#[derive(Parser)]
#[command(
    name = "socialname",
    version,
    about = "Check whether a username is taken on social networks and other sites",
    after_help = "Each site is requested once; a site that fails or times out is reported \
                  as unknown instead of aborting the run.\n\n\
                  Site data is a JSON object of site definitions. The bundled list is used \
                  unless --json names a local file or an http(s) URL."
)]
struct Cli {
    /// Usernames to check (also reads from stdin)
    usernames: Vec<String>,

    /// Site data file or URL
    #[arg(short, long = "json", value_name = "JSON_FILE", env = "SOCIALNAME_SITES")]
    json: Option<String>,

    /// Limit the check to this site (repeatable)
    #[arg(long = "site", value_name = "SITE_NAME")]
    sites: Vec<String>,

    /// Seconds to wait for each site's response
    #[arg(long, value_name = "SECS", default_value = "10", value_parser = parse_seconds)]
    timeout: Duration,

    /// Seconds allowed for all sites of one username; slower sites are unknown
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    deadline: Option<Duration>,

    /// Number of concurrent requests
    #[arg(short, long, default_value_t = MAX_CONCURRENT_REQUESTS, value_parser = parse_workers)]
    workers: usize,

    /// Make requests over a proxy, e.g. socks5://127.0.0.1:1080
    #[arg(short, long, value_name = "PROXY_URL")]
    proxy: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Also print sites where the username was not found
    #[arg(short = 'a', long)]
    print_all: bool,

    /// Order of results [default: text and TSV on stdout are printed as
    /// each site answers, otherwise registry]
    #[arg(long, value_enum)]
    sort: Option<SortOrder>,

    /// Write the report to this file instead of stdout
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Also write one file per username into this directory
    #[arg(long = "folderoutput", value_name = "DIR", conflicts_with = "output")]
    folder_output: Option<PathBuf>,

    /// Also write master.csv, the profiles found for every username, into
    /// --folderoutput or the current directory
    #[arg(short = 's', long = "singleoutput")]
    single_output: bool,

    /// Print the list of supported sites as Markdown and exit
    #[arg(long)]
    list_sites: bool,

    /// Show debug logging and response times
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Tsv,
    Json,
    Csv,
}

impl From<OutputFormat> for Format {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Text => Format::Text,
            OutputFormat::Tsv => Format::Tsv,
            OutputFormat::Json => Format::Json,
            OutputFormat::Csv => Format::Csv,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SortOrder {
    /// Order of the site data file
    Registry,
    /// Site name, case-insensitive
    Name,
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` must be a number"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("`{value}` must be greater than 0"));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

fn parse_workers(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("at least one worker is required".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(unix)]
fn reset_sigpipe() {
    // SAFETY: called first thing in main, before any other thread exists.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

#[cfg(not(unix))]
fn reset_sigpipe() {}

fn main() -> ExitCode {
    reset_sigpipe();

    let cli = Cli::parse();
    init_cli_logger(cli.verbose);

    let mut builder = Client::builder().timeout(cli.timeout);
    if let Some(proxy) = &cli.proxy {
        builder = builder.proxy(proxy.as_str());
    }
    let client = match builder.build() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: invalid proxy `{}`: {e}", cli.proxy.as_deref().unwrap_or(""));
            return ExitCode::from(2);
        }
    };

    let usernames = if cli.list_sites {
        Vec::new()
    } else {
        match read_usernames(cli.usernames) {
            Ok(usernames) => usernames,
            Err(code) => return code,
        }
    };

    let source = cli
        .json
        .as_deref()
        .map(SiteSource::parse)
        .unwrap_or_default();
    let mut registry = match Registry::load(&source, &client) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(1);
        }
    };
    if !cli.sites.is_empty() {
        registry = match registry.filter(&cli.sites) {
            Ok(filtered) => filtered,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::from(1);
            }
        };
    }

    if cli.list_sites {
        let mut stdout = io::stdout().lock();
        if let Err(e) = stdout.write_all(registry.to_markdown().as_bytes()) {
            eprintln!("error: writing site list: {e}");
            return ExitCode::from(1);
        }
        return ExitCode::SUCCESS;
    }

    let mut checker = Checker::new(client).workers(cli.workers);
    if let Some(deadline) = cli.deadline {
        checker = checker.deadline(deadline);
    }

    let options = RenderOptions {
        format: cli.format.into(),
        print_all: cli.print_all,
        show_elapsed: cli.verbose,
    };
    // Lines go out in completion order unless an order was asked for.
    let streaming = cli.sort.is_none() && cli.output.is_none() && options.format.is_line_oriented();

    let mut stdout = io::stdout().lock();
    let mut reports: Vec<Report> = Vec::with_capacity(usernames.len());
    for username in &usernames {
        let mut write_error = None;
        if streaming {
            write_error = write_header(&mut stdout, username, options).err();
        }
        let outcome = checker.run_with(&registry, username, |result| {
            debug!(
                site = %result.site,
                classification = %result.classification,
                elapsed_ms = ?result.elapsed_ms,
                "result"
            );
            if streaming && write_error.is_none() {
                write_error = write_result(&mut stdout, result, options).err();
            }
        });
        let mut report = match outcome {
            Ok(report) => report,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::from(2);
            }
        };
        if streaming && write_error.is_none() {
            write_error = write_footer(&mut stdout, &report, options).err();
        }
        if let Some(e) = write_error {
            eprintln!("error: writing report: {e}");
            return ExitCode::from(1);
        }
        if cli.sort == Some(SortOrder::Name) {
            report.sort_by_site();
        }
        reports.push(report);
    }

    if !streaming {
        let written = match &cli.output {
            Some(path) => match File::create(path) {
                Ok(file) => write_reports(BufWriter::new(file), &reports, options),
                Err(e) => {
                    eprintln!("error: creating {}: {e}", path.display());
                    return ExitCode::from(1);
                }
            },
            None => write_reports(BufWriter::new(&mut stdout), &reports, options),
        };
        if let Err(e) = written {
            eprintln!("error: {e}");
            return ExitCode::from(1);
        }
    }

    if let Some(dir) = &cli.folder_output {
        if let Err(e) = write_report_files(dir, &reports, options) {
            eprintln!("error: {e}");
            return ExitCode::from(1);
        }
    }

    if cli.single_output {
        let dir = cli.folder_output.as_deref().unwrap_or(Path::new("."));
        if let Err(e) = write_master(dir, &reports) {
            eprintln!("error: {e}");
            return ExitCode::from(1);
        }
    }

    ExitCode::SUCCESS
}

/// Usernames from the arguments and, when piped, stdin; deduplicated and
/// validated. Failures are usage errors.
fn read_usernames(mut usernames: Vec<String>) -> Result<Vec<String>, ExitCode> {
    // Read from stdin if not a terminal
    if !io::stdin().is_terminal() {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(l) => {
                    let trimmed = l.trim();
                    if !trimmed.is_empty() {
                        usernames.push(trimmed.to_string());
                    }
                }
                Err(e) => {
                    eprintln!("error: reading stdin: {e}");
                    return Err(ExitCode::from(2));
                }
            }
        }
    }

    if usernames.is_empty() {
        eprintln!("error: no usernames provided");
        eprintln!("usage: socialname [OPTIONS] [USERNAMES]...");
        return Err(ExitCode::from(2));
    }

    // Deduplicate while preserving order
    let mut seen = HashSet::new();
    usernames.retain(|u| seen.insert(u.clone()));

    for username in &usernames {
        if let Err(e) = validate_username(username) {
            eprintln!("error: {e}");
            return Err(ExitCode::from(2));
        }
    }
    Ok(usernames)
}

fn write_master(dir: &Path, reports: &[Report]) -> Result<(), String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("creating {}: {e}", dir.display()))?;
    let path = dir.join("master.csv");
    let file = File::create(&path).map_err(|e| format!("creating {}: {e}", path.display()))?;
    write_master_csv(BufWriter::new(file), reports)
        .map_err(|e| format!("writing {}: {e}", path.display()))
}
