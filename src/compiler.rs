//! Build orchestration.
//!
//! ## Phases
//!
//! ```text
//!  per document, in parallel          barrier        per document, in parallel
//! ┌──────────────────────────┐                      ┌─────────────────────────┐
//! │ parse → build → attach   │──┐               ┌──▶│ bind references         │──┐
//! └──────────────────────────┘  │  collect      │   └─────────────────────────┘  │  merge
//! ┌──────────────────────────┐  ├─▶ symbols ────┤   ┌─────────────────────────┐  ├─▶ validate
//! │ parse → build → attach   │──┘  (one pass)   └──▶│ bind references         │──┘
//! └──────────────────────────┘                      └─────────────────────────┘
//! ```
//!
//! Each document task owns its [`DiagnosticSink`] and hands it back when it finishes, and the
//! orchestrator is the only place where diagnostics from different tasks are combined. No task
//! writes to shared state. After the barrier the symbol table and documents are shared
//! read-only through [`Arc`]s.
//!
//! If any task fails before the barrier, the remaining tasks are aborted and the build returns
//! [`VeraError::Aborted`]. Partial results are dropped.

use std::{path::Path, sync::Arc};
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::{
    codec::{
        builder::EntityBuilder,
        diagnostic::{Diagnostic, DiagnosticSink},
        directive::DirectiveParser,
    },
    config::BuildConfig,
    error::VeraError,
    properties::Document,
    resolver::{bind_document, ResolvedGraph, SymbolTable},
    validator::{BuildReport, Validator},
};

/// Text of one document plus the id it is known by when its frontmatter does not declare one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub id: String,
    pub path: Option<String>,
    pub text: String,
}

impl SourceDocument {
    /// A document addressed by its build-relative path, which doubles as its default id.
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        let path = path.into().replace('\\', "/");
        SourceDocument {
            id: path.clone(),
            path: Some(path),
            text: text.into(),
        }
    }

    /// A document with no backing file.
    pub fn anonymous(id: impl Into<String>, text: impl Into<String>) -> Self {
        SourceDocument {
            id: id.into(),
            path: None,
            text: text.into(),
        }
    }
}

/// Parse, build and attach provenance for a single document. Never fails: every problem is in
/// the returned diagnostics.
pub fn process_document(
    source: &SourceDocument,
    parser: &DirectiveParser,
    builder: &EntityBuilder,
) -> (Document, Vec<Diagnostic>) {
    let mut sink = DiagnosticSink::new(source.id.as_str());
    let raw = parser.parse(&source.text, &mut sink);
    let document = builder.build(raw, &source.id, source.path.as_deref(), &mut sink);
    (document, sink.into_vec())
}

/// Collect every file under `root` whose extension is configured, sorted by path. A single
/// file is also accepted. Ids are paths relative to `root` with `/` separators.
#[tracing::instrument(skip(config))]
pub fn discover(root: &Path, config: &BuildConfig) -> Result<Vec<SourceDocument>, VeraError> {
    if root.is_file() {
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| VeraError::NotFound(format!("{root:?} has no file name")))?;
        return Ok(vec![read_source(root, name)?]);
    }
    if !root.is_dir() {
        return Err(VeraError::NotFound(format!("{root:?} does not exist")));
    }

    let mut sources = vec![];
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
        });
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || !config.accepts(entry.path()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)?
            .components()
            .map(|component| component.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<String>>()
            .join("/");
        sources.push(read_source(entry.path(), relative)?);
    }
    tracing::debug!("discovered {} document(s) under {root:?}", sources.len());
    Ok(sources)
}

fn read_source(path: &Path, relative: String) -> Result<SourceDocument, VeraError> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8(bytes).map_err(|_| VeraError::Untokenizable {
        path: relative.clone(),
    })?;
    Ok(SourceDocument::new(relative, text))
}

/// Collected output of the pre-barrier phase, ordered by build position.
struct Built {
    documents: Vec<Document>,
    diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentCompiler {
    config: BuildConfig,
}

impl DocumentCompiler {
    pub fn new(config: BuildConfig) -> Self {
        DocumentCompiler { config }
    }

    /// Load `vera.toml` from `root` (if present) and build a compiler from it.
    pub fn for_root(root: &Path) -> Result<Self, VeraError> {
        Ok(DocumentCompiler::new(BuildConfig::load_or_default(root)?))
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    fn parser(&self) -> DirectiveParser {
        DirectiveParser::new(self.config.max_nesting_depth)
    }

    fn builder(&self) -> EntityBuilder {
        EntityBuilder::new(&self.config)
    }

    /// Discover and compile every document under `root`.
    pub async fn compile_directory(&self, root: &Path) -> Result<BuildReport, VeraError> {
        let sources = discover(root, &self.config)?;
        self.compile(sources).await
    }

    /// Compile a build concurrently: one blocking task per document up to the barrier, then one
    /// binding task per document against the shared, read-only symbol table.
    #[tracing::instrument(skip_all, fields(documents = sources.len()))]
    pub async fn compile(&self, sources: Vec<SourceDocument>) -> Result<BuildReport, VeraError> {
        let Built {
            documents,
            mut diagnostics,
        } = self.build_all(sources).await?;

        let (table, collected) = SymbolTable::collect(&documents);
        diagnostics.extend(collected);

        let table = Arc::new(table);
        let documents = Arc::new(documents);
        let mut tasks = JoinSet::new();
        for index in 0..documents.len() {
            let table = table.clone();
            let documents = documents.clone();
            tasks.spawn_blocking(move || (index, bind_document(&table, &documents, index)));
        }
        let mut bound = Vec::with_capacity(documents.len());
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(part) => bound.push(part),
                Err(err) => {
                    tasks.abort_all();
                    return Err(err.into());
                }
            }
        }
        bound.sort_by_key(|(index, _)| *index);

        let mut parts = Vec::with_capacity(bound.len());
        for (_, (part, found)) in bound {
            parts.push(part);
            diagnostics.extend(found);
        }
        drop(table);
        let documents = Arc::try_unwrap(documents).unwrap_or_else(|shared| (*shared).clone());
        Ok(Validator::new(&self.config).validate(
            documents,
            ResolvedGraph::merge(parts),
            diagnostics,
        ))
    }

    /// Per-document tasks. Returns only after every task has finished (the barrier).
    async fn build_all(&self, sources: Vec<SourceDocument>) -> Result<Built, VeraError> {
        let count = sources.len();
        let mut tasks = JoinSet::new();
        for (position, source) in sources.into_iter().enumerate() {
            let parser = self.parser();
            let builder = self.builder();
            tasks.spawn_blocking(move || {
                let (document, diagnostics) = process_document(&source, &parser, &builder);
                (position, document, diagnostics)
            });
        }

        let mut processed = Vec::with_capacity(count);
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(done) => processed.push(done),
                Err(err) => {
                    tracing::warn!("document task failed, abandoning the build: {err}");
                    tasks.abort_all();
                    return Err(err.into());
                }
            }
        }
        processed.sort_by_key(|(position, _, _)| *position);
        tracing::debug!("barrier reached for {count} document(s)");

        let mut built = Built {
            documents: Vec::with_capacity(count),
            diagnostics: vec![],
        };
        for (_, document, diagnostics) in processed {
            built.documents.push(document);
            built.diagnostics.extend(diagnostics);
        }
        Ok(built)
    }

    /// The same pipeline on the calling thread.
    #[tracing::instrument(skip_all, fields(documents = sources.len()))]
    pub fn compile_sequential(&self, sources: &[SourceDocument]) -> BuildReport {
        let parser = self.parser();
        let builder = self.builder();
        let mut documents = Vec::with_capacity(sources.len());
        let mut diagnostics = vec![];
        for source in sources.iter() {
            let (document, found) = process_document(source, &parser, &builder);
            documents.push(document);
            diagnostics.extend(found);
        }

        let (table, collected) = SymbolTable::collect(&documents);
        diagnostics.extend(collected);
        let mut parts = Vec::with_capacity(documents.len());
        for index in 0..documents.len() {
            let (part, found) = bind_document(&table, &documents, index);
            parts.push(part);
            diagnostics.extend(found);
        }
        Validator::new(&self.config).validate(documents, ResolvedGraph::merge(parts), diagnostics)
    }
}
