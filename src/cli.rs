use anyhow::{bail, Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::{
    anthropic::AnthropicClient,
    cli_types::IndexArgs,
    describer::{ClaudeDescriber, DescriptionService, HeuristicDescriber},
    pipeline::{Pipeline, RunMode, RunReport},
    report::ReportWriter,
    scanner::RepositoryScanner,
    storage::DigestStore,
    CliConfig,
};

/// First line after the shebang in every hook we write
pub const HOOK_MARKER: &str = "# installed by repobrief";
const HOOK_NAME: &str = "post-commit";

pub struct CliApp {
    config: CliConfig,
    verbose: bool,
    quiet: bool,
}

impl CliApp {
    pub fn new(config: CliConfig, verbose: bool, quiet: bool, colors_enabled: bool) -> Self {
        if !colors_enabled {
            colored::control::set_override(false);
        }
        Self { config, verbose, quiet }
    }

    pub fn config(&self) -> &CliConfig {
        &self.config
    }

    pub async fn index(&self, args: IndexArgs) -> Result<RunReport> {
        let root = args
            .path
            .canonicalize()
            .with_context(|| format!("Repository root not found: {}", args.path.display()))?;

        let mut config = self.config.clone();
        if let Some(output) = &args.output {
            config.output.path = output.clone();
        }
        if let Some(batch_size) = args.batch_size {
            config.analysis.batch_size = batch_size;
        }
        let cache_path = config.cache_path(&root);
        let output_path = config.output_path(&root);

        if !self.quiet {
            self.print_header(&format!("Indexing {}", root.display()));
        }

        // The store and the index itself must never show up as project files
        let mut scanner = RepositoryScanner::new(&config.file_scanning).context("Invalid file scanning patterns")?;
        if let Some(cache_dir) = cache_path.parent().and_then(|p| p.strip_prefix(&root).ok()) {
            scanner = scanner.exclude_path(cache_dir);
        }
        if let Ok(cache_file) = cache_path.strip_prefix(&root) {
            scanner = scanner.exclude_path(cache_file);
        }
        if let Ok(output_file) = output_path.strip_prefix(&root) {
            scanner = scanner.exclude_path(output_file);
        }

        let scan = scanner
            .scan(&root)
            .with_context(|| format!("Failed to scan {}", root.display()))?;
        if self.verbose {
            self.print_info(&format!(
                "Discovered {} files ({} over the size limit, {} possible credentials skipped) in {:?}",
                scan.files.len(),
                scan.skipped_large,
                scan.skipped_sensitive,
                scan.duration
            ));
        }

        let mut settings = config.analysis_settings();
        if args.free {
            settings.rpm_limit = 0;
        }

        let progress = self.progress_bar(args.dry_run);
        let observer_bar = progress.clone();

        let mut builder = Pipeline::builder(&root)
            .cache_path(&cache_path)
            .rules(config.classification_rules())
            .settings(settings)
            .heuristic_descriptions(args.free)
            .dry_run(args.dry_run)
            .force_full(args.full)
            .observer(Arc::new(move |done: usize, total: usize| {
                observer_bar.set_length(total as u64);
                observer_bar.set_position(done as u64);
            }));
        if let Some(service) = self.build_service(&config, args.free)? {
            builder = builder.service(service);
        }
        let pipeline = builder.build().context("Invalid classification rules")?;

        let report = pipeline.run(scan.files).await;
        progress.finish_and_clear();
        let report = report?;

        if args.dry_run {
            self.print_plan(&report);
            return Ok(report);
        }

        let project = args
            .project
            .clone()
            .or_else(|| config.output.project_name.clone())
            .or_else(|| root.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| "Project".to_string());
        let markdown = ReportWriter::new().render(&project, &report.descriptions, &report.pending);
        ReportWriter::new()
            .write_to(&output_path, &markdown)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        info!("Wrote index to {}", output_path.display());

        self.print_summary(&report, &output_path);
        Ok(report)
    }

    fn build_service(&self, config: &CliConfig, free: bool) -> Result<Option<Arc<dyn DescriptionService>>> {
        if free {
            return Ok(Some(Arc::new(HeuristicDescriber::new())));
        }
        let Some(api_key) = config.anthropic_api_key() else {
            return Ok(None);
        };

        let client = AnthropicClient::new(
            api_key.to_string(),
            config.ai.base_url.clone(),
            Some(config.ai.max_tokens),
            Some(config.ai.timeout_seconds),
        )
        .context("Failed to create Anthropic client")?;
        Ok(Some(Arc::new(ClaudeDescriber::new(
            client,
            config.ai.batch_model.clone(),
            config.ai.deep_model.clone(),
        ))))
    }

    fn progress_bar(&self, hidden: bool) -> ProgressBar {
        if self.quiet || hidden {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} requests ({elapsed})") {
            bar.set_style(style.progress_chars("=> "));
        }
        bar
    }

    /// Write the post-commit hook; returns its path.
    pub fn install_hook(&self, root: &Path, force: bool) -> Result<PathBuf> {
        let hook_path = hook_path(root)?;

        if hook_path.exists() {
            let existing = std::fs::read_to_string(&hook_path)
                .with_context(|| format!("Failed to read {}", hook_path.display()))?;
            if !existing.contains(HOOK_MARKER) && !force {
                bail!(
                    "{} already exists and was not installed by repobrief (use --force to replace it)",
                    hook_path.display()
                );
            }
        }

        let script = format!(
            "#!/bin/sh\n{}\nrepobrief index --quiet \"$(git rev-parse --show-toplevel)\" >/dev/null 2>&1 &\n",
            HOOK_MARKER
        );
        std::fs::write(&hook_path, script).with_context(|| format!("Failed to write {}", hook_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&hook_path, std::fs::Permissions::from_mode(0o755))
                .with_context(|| format!("Failed to make {} executable", hook_path.display()))?;
        }

        if !self.quiet {
            self.print_success(&format!("Installed {}", hook_path.display()));
        }
        Ok(hook_path)
    }

    /// Remove our hook. Returns false when there was none.
    pub fn uninstall_hook(&self, root: &Path) -> Result<bool> {
        let hook_path = hook_path(root)?;
        if !hook_path.exists() {
            if !self.quiet {
                self.print_info("No post-commit hook installed");
            }
            return Ok(false);
        }

        let existing =
            std::fs::read_to_string(&hook_path).with_context(|| format!("Failed to read {}", hook_path.display()))?;
        if !existing.contains(HOOK_MARKER) {
            bail!("{} was not installed by repobrief; leaving it in place", hook_path.display());
        }
        std::fs::remove_file(&hook_path).with_context(|| format!("Failed to remove {}", hook_path.display()))?;

        if !self.quiet {
            self.print_success(&format!("Removed {}", hook_path.display()));
        }
        Ok(true)
    }

    pub fn show_config(&self, root: &Path) -> Result<()> {
        self.print_header("Configuration");
        println!("{}", self.config.to_display_toml()?);

        let cache_path = self.config.cache_path(root);
        self.print_info("Digest store:");
        println!("  Path: {}", cache_path.display());
        if cache_path.exists() {
            let entries = DigestStore::new(&cache_path).load();
            println!("  Entries: {}", entries.len());
        } else {
            println!("  Entries: 0 (no store yet)");
        }

        match CliConfig::user_config_path() {
            Some(path) => println!("  User config: {}", path.display()),
            None => println!("  User config: unavailable"),
        }
        let credential = if self.config.anthropic_api_key().is_some() { "set" } else { "missing (use --free)" };
        println!("  API key: {}", credential);
        Ok(())
    }

    fn print_plan(&self, report: &RunReport) {
        self.print_header("Dry run");
        println!("  Mode:     {}", mode_label(report.mode));
        println!("  Changes:  {}", report.diff.summary());
        println!(
            "  Analysis: {} skip, {} batch in {} requests, {} deep",
            report.plan.skip, report.plan.batch, report.plan.chunks, report.plan.deep
        );
        println!("  Requests: {}", report.plan.units());
        if !report.excluded.is_empty() {
            self.print_warning(&format!("{} files excluded (binary or unreadable)", report.excluded.len()));
        }
    }

    fn print_summary(&self, report: &RunReport, output_path: &Path) {
        if !report.pending.is_empty() {
            self.print_warning(&format!(
                "{} files could not be described and will be retried next run",
                report.pending.len()
            ));
            if self.verbose {
                for path in &report.pending {
                    println!("    {}", path.yellow());
                }
            }
        }
        if self.quiet {
            return;
        }

        println!("  Mode:     {}", mode_label(report.mode));
        println!("  Changes:  {}", report.diff.summary());
        println!("  Requests: {}", report.service_calls);
        if !report.excluded.is_empty() {
            println!("  Excluded: {} (binary or unreadable)", report.excluded.len());
        }
        self.print_success(&format!(
            "{} files described in {} ({:.1?})",
            report.descriptions.len(),
            output_path.display(),
            report.duration
        ));
    }

    fn print_header(&self, title: &str) {
        println!("{}", title.bold().underline());
    }

    fn print_success(&self, message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    fn print_info(&self, message: &str) {
        println!("{} {}", "•".blue(), message);
    }

    fn print_warning(&self, message: &str) {
        eprintln!("{} {}", "!".yellow().bold(), message);
    }
}

fn hook_path(root: &Path) -> Result<PathBuf> {
    let git_dir = root.join(".git");
    if !git_dir.is_dir() {
        bail!("{} is not a git repository", root.display());
    }
    let hooks = git_dir.join("hooks");
    std::fs::create_dir_all(&hooks).with_context(|| format!("Failed to create {}", hooks.display()))?;
    Ok(hooks.join(HOOK_NAME))
}

fn mode_label(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Full => "full",
        RunMode::Incremental => "incremental",
    }
}
