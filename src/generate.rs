//! `tutor generate` and `tutor plan`.
//!
//! Wires the configured crawler, model client, prompt store and
//! repository store into a [`Pipeline`], runs it, and writes the
//! tutorial to the output directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use repo_tutor_core::llm::LlmClient;
use repo_tutor_core::models::{ChangeAnalysis, DocumentationMode, RegenerationPlan};
use repo_tutor_core::plan::RegenerationPreference;
use repo_tutor_core::prompt_cache::PromptCache;

use crate::config::Config;
use crate::connector_fs::scan_directory;
use crate::export;
use crate::llm::create_client;
use crate::pipeline::{plan_generation, GenerationRequest, Pipeline, PipelineSettings};
use crate::progress::ProgressMode;
use crate::prompt_store::SqlitePromptStore;
use crate::repo_store::FileRepoCacheStore;

/// Command-line overrides for one generation run.
#[derive(Debug, Clone, Default)]
pub struct GenerateArgs {
    pub dir: PathBuf,
    pub repo_url: Option<String>,
    pub project_name: Option<String>,
    pub mode: Option<DocumentationMode>,
    pub language: Option<String>,
    pub full: bool,
    pub no_cache: bool,
    pub output: Option<PathBuf>,
}

/// The repository identity for a local checkout: the given URL, or the
/// canonical directory path.
pub fn resolve_repo_url(dir: &Path, repo_url: Option<&str>) -> Result<String> {
    match repo_url {
        Some(url) if !url.trim().is_empty() => Ok(url.trim().to_string()),
        _ => {
            let canonical = dir
                .canonicalize()
                .with_context(|| format!("Failed to resolve directory: {}", dir.display()))?;
            Ok(canonical.to_string_lossy().to_string())
        }
    }
}

/// Scan `args.dir` and build the request, with command-line overrides
/// applied over the `[generation]` settings.
pub fn build_request(config: &Config, args: &GenerateArgs) -> Result<GenerationRequest> {
    let files = scan_directory(&args.dir, &config.crawl)?;
    let repo_url = resolve_repo_url(&args.dir, args.repo_url.as_deref())?;

    let mut request = GenerationRequest::new(repo_url, files);
    if let Some(name) = args.project_name.as_ref().filter(|n| !n.trim().is_empty()) {
        request.project_name = name.trim().to_string();
    }
    request.language = args
        .language
        .clone()
        .unwrap_or_else(|| config.generation.language.clone());
    request.documentation_mode = args.mode.unwrap_or(config.generation.documentation_mode);
    request.max_abstractions = config.generation.max_abstractions;
    request.max_lines_per_file = config.generation.max_lines_per_file;
    request.use_cache = config.generation.use_cache && !args.no_cache;
    if args.full {
        request.regeneration = RegenerationPreference::Full;
    }
    Ok(request)
}

pub async fn run_generate(config: &Config, args: GenerateArgs, progress: ProgressMode) -> Result<()> {
    let request = build_request(config, &args)?;

    let llm: Arc<dyn LlmClient> = Arc::from(create_client(&config.llm)?);
    let prompt_store = Arc::new(SqlitePromptStore::open(&config.cache.prompt_db).await?);
    let prompt_cache =
        PromptCache::new(prompt_store.clone()).with_fuzzy_threshold(config.cache.fuzzy_threshold);
    let repo_store = Arc::new(FileRepoCacheStore::new(&config.cache.dir));

    let pipeline = Pipeline::new(
        llm,
        Arc::new(prompt_cache),
        repo_store,
        PipelineSettings::from_config(config),
    )
    .with_progress(Arc::from(progress.reporter()));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted; stopping after the current step.");
            on_signal.cancel();
        }
    });

    let result = pipeline.run(request, &cancel).await;
    signal_task.abort();
    prompt_store.close().await;
    let outcome = result?;

    let output_dir = args.output.unwrap_or_else(|| config.generation.output_dir.clone());
    let written = export::write_tutorial(&outcome.tutorial, &output_dir, &outcome.project_name)?;

    println!("Tutorial written to {}", written.display());
    println!("  Plan:        {} ({})", outcome.plan.mode, outcome.plan.reason);
    println!("  Chapters:    {}", outcome.chapters.len());
    println!(
        "  LLM calls:   {} ({} served from cache)",
        outcome.stats.llm_calls, outcome.stats.cache_hits
    );
    if outcome.stats.prompt_tokens + outcome.stats.completion_tokens > 0 {
        println!(
            "  Tokens:      {} in / {} out",
            outcome.stats.prompt_tokens, outcome.stats.completion_tokens
        );
    }
    if outcome.stats.cost > 0.0 {
        println!("  Cost:        ${:.4}", outcome.stats.cost);
    }
    if !outcome.cache_saved {
        println!("  Warning: the repository cache could not be updated.");
    }
    Ok(())
}

/// Print the change analysis and regeneration plan without calling a model.
pub async fn run_plan(config: &Config, args: &GenerateArgs) -> Result<()> {
    let request = build_request(config, args)?;
    let repo_store = FileRepoCacheStore::new(&config.cache.dir);

    let planned = plan_generation(
        &repo_store,
        &request,
        &request.files,
        &config.regeneration.policy(),
    )
    .await;

    println!("Repository: {}", request.repo_url);
    println!("Files:      {}", request.files.len());
    if planned.previous.is_some() {
        print_analysis(&planned.analysis);
    } else {
        println!("No cached generation found.");
    }
    print_plan(&planned.plan);
    Ok(())
}

fn print_analysis(analysis: &ChangeAnalysis) {
    println!();
    println!("  Added:     {}", analysis.added_files.len());
    println!("  Modified:  {}", analysis.modified_files.len());
    println!("  Deleted:   {}", analysis.deleted_files.len());
    println!("  Changed:   {:.1}%", analysis.change_percentage);
    for path in analysis.changed_paths() {
        println!("    {}", path);
    }
}

fn print_plan(plan: &RegenerationPlan) {
    println!();
    println!("Plan: {}", plan.mode);
    println!("  Reason:            {}", plan.reason);
    println!("  Re-identify:       {}", if plan.rerun_abstraction_identification { "yes" } else { "no" });
    println!("  Estimated savings: {:.1}%", plan.estimated_savings);
    if !plan.chapters_to_regenerate.is_empty() {
        println!("  Chapters to regenerate:");
        for slug in &plan.chapters_to_regenerate {
            println!("    {}", slug);
        }
    }
}
