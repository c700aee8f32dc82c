use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use lexicon_core::persist::{load_meta, save_meta};
use lexicon_core::{
    source_paths_from_env, Catalog, CatalogConfig, CompatMode, FormatVersion, FullTextIndex, IndexPaths, LookupMode,
    MetaFile, SourceRegistry, SOURCES_ENV,
};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lexicon")]
#[command(about = "Build, query and maintain dictionary indexes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct SourceArgs {
    /// Dictionary file to load (repeatable, load order matters)
    #[arg(long = "source", value_name = "PATH")]
    sources: Vec<PathBuf>,
    /// Directory scanned recursively for supported dictionary files
    #[arg(long, value_name = "DIR")]
    scan_dir: Option<PathBuf>,
    /// Full-text build workers, 0 for available parallelism
    #[arg(long, default_value_t = 0)]
    workers: usize,
    /// Policy for reusing a persisted full-text index: strict, auto or loose
    #[arg(long, default_value_t = CompatMode::Auto)]
    compat: CompatMode,
}

#[derive(Subcommand)]
enum Commands {
    /// Load sources and write words.tsv, fulltext.udft and meta.json
    Build {
        #[command(flatten)]
        src: SourceArgs,
        /// Output index directory
        #[arg(long)]
        output: PathBuf,
    },
    /// Headword lookup
    Lookup {
        #[command(flatten)]
        src: SourceArgs,
        query: String,
        /// exact, prefix, fuzzy, wildcard or regex
        #[arg(long, default_value_t = LookupMode::Prefix)]
        mode: LookupMode,
        #[arg(long, default_value_t = 20)]
        k: usize,
        /// Print definitions for each match
        #[arg(long, default_value_t = false)]
        define: bool,
    },
    /// Ranked full-text search over definitions
    Search {
        #[command(flatten)]
        src: SourceArgs,
        query: String,
        /// Build directory whose fulltext.udft is reused when the policy accepts it
        #[arg(long)]
        index: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        k: usize,
    },
    /// Print statistics of a full-text file or build directory
    Stats {
        path: PathBuf,
    },
    /// Check whether a persisted full-text index matches the loaded sources
    Verify {
        #[command(flatten)]
        src: SourceArgs,
        path: PathBuf,
    },
    /// Rewrite any readable full-text file as UDFT3 stamped for the loaded sources
    Upgrade {
        #[command(flatten)]
        src: SourceArgs,
        input: PathBuf,
        output: PathBuf,
    },
    /// Print the signature of the loaded sources
    Signature {
        #[command(flatten)]
        src: SourceArgs,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { src, output } => build(&src, output),
        Commands::Lookup { src, query, mode, k, define } => lookup(&src, &query, mode, k, define),
        Commands::Search { src, query, index, k } => search(&src, &query, index, k),
        Commands::Stats { path } => stats(path),
        Commands::Verify { src, path } => verify(&src, path),
        Commands::Upgrade { src, input, output } => upgrade(&src, input, output),
        Commands::Signature { src } => {
            println!("{}", open_catalog(&src)?.signature());
            Ok(())
        }
    }
}

fn open_catalog(args: &SourceArgs) -> Result<Catalog> {
    let config = CatalogConfig { fulltext_workers: args.workers, compat: args.compat };
    let mut catalog = Catalog::new(SourceRegistry::with_defaults(), config);
    let mut paths = args.sources.clone();
    if let Some(dir) = &args.scan_dir {
        if !dir.is_dir() {
            bail!("{} is not a directory", dir.display());
        }
        paths.extend(catalog.registry().discover(dir));
    }
    if paths.is_empty() {
        paths = source_paths_from_env();
    }
    if paths.is_empty() {
        bail!("no sources given; use --source, --scan-dir or {SOURCES_ENV}");
    }
    let added = catalog.add_sources(&paths)?;
    tracing::info!(sources = added, words = catalog.engine().word_count(), "catalog ready");
    Ok(catalog)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build(args: &SourceArgs, output: PathBuf) -> Result<()> {
    let mut catalog = open_catalog(args)?;
    let paths = IndexPaths::new(&output);
    fs::create_dir_all(&paths.root).with_context(|| format!("create {}", paths.root.display()))?;

    catalog.save_index(paths.words())?;
    catalog.build_fulltext();
    catalog.save_fulltext(paths.fulltext())?;

    let meta = MetaFile {
        num_words: catalog.engine().word_count(),
        num_docs: catalog.fulltext().map(FullTextIndex::doc_count).unwrap_or(0),
        created_at: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "".into()),
        version: FormatVersion::CURRENT.number(),
        signature: catalog.signature().to_string(),
    };
    save_meta(&paths, &meta)?;

    tracing::info!(output = %output.display(), words = meta.num_words, docs = meta.num_docs, "index build complete");
    Ok(())
}

fn lookup(args: &SourceArgs, query: &str, mode: LookupMode, k: usize, define: bool) -> Result<()> {
    let catalog = open_catalog(args)?;
    for word in catalog.lookup(mode, query, k) {
        if define {
            for d in catalog.definitions(&word) {
                println!("{}\t[{}]\t{}", d.word, d.source, d.definition);
            }
        } else {
            println!("{word}");
        }
    }
    Ok(())
}

fn search(args: &SourceArgs, query: &str, index: Option<PathBuf>, k: usize) -> Result<()> {
    let mut catalog = open_catalog(args)?;
    match index {
        Some(dir) => {
            let origin = catalog.load_or_build_fulltext(IndexPaths::new(dir).fulltext());
            tracing::info!(?origin, "full-text index ready");
        }
        None => catalog.build_fulltext(),
    }
    print_json(&catalog.fulltext_search(query, k))
}

#[derive(Serialize)]
struct StatsReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<MetaFile>,
    fulltext: lexicon_core::FullTextStats,
}

fn stats(path: PathBuf) -> Result<()> {
    let (file, meta) = if path.is_dir() {
        let paths = IndexPaths::new(&path);
        let meta = match load_meta(&paths) {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!(error = %e, "no readable meta.json");
                None
            }
        };
        (paths.fulltext(), meta)
    } else {
        (path, None)
    };
    let mut index = FullTextIndex::new();
    index.load(&file).with_context(|| format!("loading {}", file.display()))?;
    print_json(&StatsReport { meta, fulltext: index.stats() })
}

fn verify(args: &SourceArgs, path: PathBuf) -> Result<()> {
    let catalog = open_catalog(args)?;
    let (_, acceptance) = catalog
        .check_fulltext(&path, args.compat)
        .with_context(|| format!("{} not usable under {} policy", path.display(), args.compat))?;
    print_json(&acceptance)
}

fn upgrade(args: &SourceArgs, input: PathBuf, output: PathBuf) -> Result<()> {
    let catalog = open_catalog(args)?;
    let from = catalog.upgrade_fulltext(&input, &output)?;
    tracing::info!(from, to = FormatVersion::CURRENT.number(), output = %output.display(), "upgraded full-text index");
    Ok(())
}
