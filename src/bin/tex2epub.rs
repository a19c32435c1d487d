//! CLI binary for edgequake-tex2epub.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_tex2epub::{
    convert, convert_to_dir, convert_to_file, convert_to_titled_file, inspect, ConversionConfig,
    ConversionOutput,
    ConversionProgressCallback, MissingIncludePolicy, ProgressCallback, RuleBook, Stage, Template,
    Tex2EpubError,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner with one log line per completed stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, source: &str) {
        self.bar.println(format!("{} {}", cyan("◆"), bold(&format!("Normalising {source}…"))));
    }

    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_prefix(stage_label(stage));
    }

    fn on_stage_complete(&self, stage: Stage, detail: &str) {
        self.bar
            .println(format!("  {} {:<14} {}", green("✓"), stage_label(stage), dim(detail)));
    }

    fn on_stage_failed(&self, stage: Stage, error: &str) {
        let msg = match error.char_indices().nth(100) {
            Some((i, _)) => format!("{}\u{2026}", &error[..i]),
            None => error.to_string(),
        };
        self.bar
            .println(format!("  {} {:<14} {}", red("✗"), stage_label(stage), red(&msg)));
        self.bar.finish_and_clear();
    }

    fn on_conversion_complete(&self, output_len: usize) {
        self.bar.finish_and_clear();
        eprintln!("{} {} bytes of normalised LaTeX", green("✔"), bold(&output_len.to_string()));
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Fetched => "Fetching",
        Stage::Unpacked => "Unpacking",
        Stage::EntryResolved => "Entry",
        Stage::Included => "Includes",
        Stage::Classified => "Template",
        Stage::Stripped => "Macros",
        Stage::Normalized => "Environments",
        Stage::Emitted => "Emit",
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Normalise an arXiv paper (stdout)
  tex2epub 1706.03762

  # Write the normalised document to a file
  tex2epub https://arxiv.org/abs/1706.03762 -o attention.tex

  # Materialise sources, figures and the normalised document for Pandoc
  tex2epub 1706.03762 --extract-to build/attention

  # Local archive or directory, forcing the entry file
  tex2epub ./paper-src --entry paper/main.tex

  # Which entry and template would be used?
  tex2epub --inspect-only 2401.00001

  # Dump the built-in rule tables, edit, and load them back
  tex2epub --list-templates > rules.json
  tex2epub --rules rules.json 2401.00001 -o paper.tex

  # JSON report (output, stats, warnings; or a structured error)
  tex2epub --json 2401.00001 > report.json

TEMPLATES:
  icml, neurips, acl_emnlp, plain_article, generic
  Custom templates loaded with --rules are addressed by their name.

ENVIRONMENT VARIABLES:
  Every flag can also be set as TEX2EPUB_<FLAG>, e.g. TEX2EPUB_TEMPLATE=icml.
  RUST_LOG overrides the log filter.
"#;

/// Normalise arXiv LaTeX sources into a single converter-ready document.
#[derive(Parser, Debug)]
#[command(
    name = "tex2epub",
    version,
    about = "Normalise arXiv LaTeX sources into a single converter-ready document",
    long_about = "Fetch an arXiv source bundle (or read a local archive or directory), find the \
entry document, inline every \\input/\\include, and rewrite conference-template macros and \
environments into plain LaTeX a generic converter can render into an e-book.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// arXiv id, arXiv/HTTP URL, local archive or directory.
    #[arg(required_unless_present = "list_templates")]
    input: Option<String>,

    /// Write the normalised LaTeX to this file instead of stdout. An existing
    /// directory gets `<title-slug>.tex` inside it.
    #[arg(short, long, env = "TEX2EPUB_OUTPUT", conflicts_with = "extract_to")]
    output: Option<PathBuf>,

    /// Write every source file, asset and the normalised document under this directory.
    #[arg(long, env = "TEX2EPUB_EXTRACT_TO")]
    extract_to: Option<PathBuf>,

    /// Force a template instead of classifying the preamble.
    #[arg(long, env = "TEX2EPUB_TEMPLATE")]
    template: Option<Template>,

    /// Entry document path inside the archive.
    #[arg(long, env = "TEX2EPUB_ENTRY")]
    entry: Option<String>,

    /// Maximum \input nesting depth.
    #[arg(long, env = "TEX2EPUB_MAX_INCLUDE_DEPTH", default_value_t = 16,
          value_parser = clap::value_parser!(u16).range(1..))]
    max_include_depth: u16,

    /// Leave \input of files absent from the archive in place instead of failing.
    #[arg(long, env = "TEX2EPUB_KEEP_MISSING_INCLUDES")]
    keep_missing_includes: bool,

    /// Replace \bibliography{..} with the archive's .bbl file.
    #[arg(long, env = "TEX2EPUB_INLINE_BBL")]
    inline_bbl: bool,

    /// JSON file with extra template profiles (tried before the built-ins).
    #[arg(long, env = "TEX2EPUB_RULES")]
    rules: Option<PathBuf>,

    /// Print the active rule tables as JSON and exit.
    #[arg(long)]
    list_templates: bool,

    /// Print entry, template and metadata only.
    #[arg(long)]
    inspect_only: bool,

    /// Output structured JSON instead of LaTeX.
    #[arg(long, env = "TEX2EPUB_JSON")]
    json: bool,

    /// Disable progress spinner.
    #[arg(long, env = "TEX2EPUB_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TEX2EPUB_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "TEX2EPUB_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "TEX2EPUB_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO-level stage logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.list_templates;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let rules = load_rules(&cli).await?;

    if cli.list_templates {
        println!("{}", rules.to_json().context("Failed to serialise rule tables")?);
        return Ok(());
    }

    let input = cli.input.clone().context("No input given")?;

    let progress_cb: Option<ProgressCallback> = if show_progress && !cli.inspect_only {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, rules, progress_cb)?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let report = match inspect(&input, &config).await {
            Ok(r) => r,
            Err(e) => return fail(&cli, e, "Failed to inspect source"),
        };
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else {
            println!("Input:        {}", input);
            println!("Entry:        {} ({:?})", report.entry.path, report.entry.source);
            println!("Template:     {}", report.classification.template);
            if let Some(ref c) = report.classification.class_name {
                println!("Class:        {}", c);
            }
            if !report.classification.packages.is_empty() {
                println!("Packages:     {}", report.classification.packages.join(", "));
            }
            if let Some(ref t) = report.metadata.title {
                println!("Title:        {}", t);
            }
            if !report.metadata.authors.is_empty() {
                println!("Authors:      {}", report.metadata.authors.join("; "));
            }
            println!("TeX files:    {}", report.tex_files.len());
            println!("Assets:       {}", report.assets);
        }
        return Ok(());
    }

    // ── Run conversion ───────────────────────────────────────────────────
    if let Some(ref dir) = cli.extract_to {
        let (output, document) = match convert_to_dir(&input, dir, &config).await {
            Ok(r) => r,
            Err(e) => return fail(&cli, e, "Conversion failed"),
        };
        report_warnings(&cli, &output);
        if cli.json {
            print_json(&output)?;
        } else if !cli.quiet {
            eprintln!("{}  →  {}", summary(&output), bold(&document.display().to_string()));
        }
    } else if let Some(ref target) = cli.output {
        // A directory gets a file named after the paper title.
        let written = if target.is_dir() {
            convert_to_titled_file(&input, target, &config).await
        } else {
            convert_to_file(&input, target, &config)
                .await
                .map(|o| (o, target.clone()))
        };
        let (output, output_path) = match written {
            Ok(r) => r,
            Err(e) => return fail(&cli, e, "Conversion failed"),
        };
        report_warnings(&cli, &output);
        if cli.json {
            print_json(&output)?;
        } else if !cli.quiet {
            eprintln!("{}  →  {}", summary(&output), bold(&output_path.display().to_string()));
        }
    } else {
        let output = match convert(&input, &config).await {
            Ok(o) => o,
            Err(e) => return fail(&cli, e, "Conversion failed"),
        };
        report_warnings(&cli, &output);
        if cli.json {
            print_json(&output)?;
        } else {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(output.latex.as_bytes())
                .context("Failed to write to stdout")?;
            // Ensure a trailing newline on stdout.
            if !output.latex.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
            if !cli.quiet && !show_progress {
                eprintln!("{}", summary(&output));
            }
        }
    }

    Ok(())
}

/// Read `--rules` on top of the built-in tables.
async fn load_rules(cli: &Cli) -> Result<RuleBook> {
    let mut rules = RuleBook::builtin();
    if let Some(ref path) = cli.rules {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read rules from {:?}", path))?;
        rules
            .extend_from_json(&json)
            .with_context(|| format!("Invalid rules in {:?}", path))?;
    }
    Ok(rules)
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, rules: RuleBook, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    if let Some(ref t) = cli.template {
        let known = rules.templates();
        if !known.contains(t) {
            let ids: Vec<&str> = known.iter().map(Template::id).collect();
            anyhow::bail!("Unknown template '{}'. Known: {}", t.id(), ids.join(", "));
        }
    }

    let mut builder = ConversionConfig::builder()
        .max_include_depth(cli.max_include_depth as usize)
        .missing_includes(if cli.keep_missing_includes {
            MissingIncludePolicy::Keep
        } else {
            MissingIncludePolicy::Fail
        })
        .inline_bibliography(cli.inline_bbl)
        .download_timeout_secs(cli.download_timeout)
        .rules(rules);

    if let Some(ref t) = cli.template {
        builder = builder.template_override(t.clone());
    }
    if let Some(ref entry) = cli.entry {
        builder = builder.entry_override(entry.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn summary(output: &ConversionOutput) -> String {
    let s = &output.stats;
    format!(
        "{} {}  {}  {} files inlined, {} macros stripped, {} rewritten, {} envs renamed, {} unwrapped  {}ms",
        if output.warnings.is_empty() { green("✔") } else { cyan("⚠") },
        output.entry.path,
        bold(output.classification.template.id()),
        s.files_included,
        s.macros_stripped,
        s.macros_rewritten,
        s.environments_renamed,
        s.environments_unwrapped,
        s.duration_ms,
    )
}

fn report_warnings(cli: &Cli, output: &ConversionOutput) {
    if cli.quiet || cli.json {
        return;
    }
    for w in &output.warnings {
        eprintln!("  {} {}", cyan("⚠"), w);
    }
}

fn print_json(output: &ConversionOutput) -> Result<()> {
    let json = serde_json::to_string_pretty(output).context("Failed to serialise output")?;
    println!("{json}");
    Ok(())
}

/// In JSON mode a failure is itself a report on stdout; otherwise it
/// propagates through anyhow.
fn fail(cli: &Cli, error: Tex2EpubError, context: &'static str) -> Result<()> {
    if cli.json {
        let report = serde_json::json!({ "error": error.report() });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise error")?
        );
        std::process::exit(1);
    }
    Err(anyhow::Error::new(error).context(context))
}
