//! Named layouts wrapped around message bodies.
//!
//! A layout is a text/html/css triplet whose text and html parts contain a
//! `{content}` marker. Layouts come from configuration (inline strings or
//! view files), from callbacks registered at runtime, or from the template
//! stored under [`LAYOUT_TEMPLATE_CODE`].

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::{LayoutFiles, LayoutVariant, PostmanConfig};
use crate::db::{template_repo, Database};
use crate::error::ComposeError;

/// Marker replaced by the message body.
pub const CONTENT_MARKER: &str = "{content}";

/// Layout name that loads the layout from the template table.
pub const DATABASE_LAYOUT: &str = "database";

/// Template code of the stored layout.
pub const LAYOUT_TEMPLATE_CODE: &str = ".layout";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutTriplet {
    pub text: String,
    pub html: String,
    pub css: String,
}

impl LayoutTriplet {
    /// Layout that leaves the body untouched.
    pub fn identity() -> Self {
        Self {
            text: CONTENT_MARKER.to_string(),
            html: CONTENT_MARKER.to_string(),
            css: String::new(),
        }
    }
}

impl Default for LayoutTriplet {
    fn default() -> Self {
        Self::identity()
    }
}

/// Renders a layout view file into a string containing `{content}`.
pub trait ViewRenderer: Send + Sync {
    fn render(&self, path: &Path) -> std::io::Result<String>;
}

/// Reads the file and turns `{{ content }}` / `{{content}}` into `{content}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileViewRenderer;

impl ViewRenderer for FileViewRenderer {
    fn render(&self, path: &Path) -> std::io::Result<String> {
        let source = std::fs::read_to_string(path)?;
        Ok(source
            .replace("{{ content }}", CONTENT_MARKER)
            .replace("{{content}}", CONTENT_MARKER))
    }
}

pub type LayoutCallback = Arc<dyn Fn() -> LayoutTriplet + Send + Sync>;

/// A resolvable layout definition.
#[derive(Clone)]
pub enum Layout {
    Inline(LayoutTriplet),
    Callback(LayoutCallback),
    Files(LayoutFiles),
    Database,
}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Inline(t) => f.debug_tuple("Inline").field(t).finish(),
            Layout::Callback(_) => f.write_str("Callback(..)"),
            Layout::Files(files) => f.debug_tuple("Files").field(files).finish(),
            Layout::Database => f.write_str("Database"),
        }
    }
}

impl From<&LayoutVariant> for Layout {
    fn from(variant: &LayoutVariant) -> Self {
        match variant {
            LayoutVariant::Files { files } => Layout::Files(files.clone()),
            LayoutVariant::Inline(inline) => Layout::Inline(LayoutTriplet {
                text: inline
                    .text
                    .clone()
                    .unwrap_or_else(|| CONTENT_MARKER.to_string()),
                html: inline
                    .html
                    .clone()
                    .unwrap_or_else(|| CONTENT_MARKER.to_string()),
                css: inline.css.clone().unwrap_or_default(),
            }),
        }
    }
}

pub struct LayoutResolver {
    default_layout: String,
    variants: HashMap<String, Layout>,
    renderer: Arc<dyn ViewRenderer>,
    db: Option<Database>,
}

impl LayoutResolver {
    pub fn new(default_layout: impl Into<String>) -> Self {
        Self {
            default_layout: default_layout.into(),
            variants: HashMap::new(),
            renderer: Arc::new(FileViewRenderer),
            db: None,
        }
    }

    pub fn from_config(config: &PostmanConfig) -> Self {
        let mut resolver = Self::new(config.default_layout.clone());
        for (name, variant) in &config.layout_variants {
            resolver.register(name.clone(), Layout::from(variant));
        }
        resolver
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ViewRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn register(&mut self, name: impl Into<String>, layout: Layout) {
        self.variants.insert(name.into(), layout);
    }

    pub fn register_callback<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: Fn() -> LayoutTriplet + Send + Sync + 'static,
    {
        self.register(name, Layout::Callback(Arc::new(callback)));
    }

    pub fn default_layout(&self) -> &str {
        &self.default_layout
    }

    /// Resolves a layout by name. An empty name selects the default layout.
    pub fn resolve(&self, name: &str) -> Result<LayoutTriplet, ComposeError> {
        let name = if name.is_empty() {
            self.default_layout.as_str()
        } else {
            name
        };

        match self.variants.get(name) {
            Some(Layout::Inline(triplet)) => Ok(triplet.clone()),
            Some(Layout::Callback(callback)) => Ok(callback()),
            Some(Layout::Files(files)) => self.render_files(name, files),
            Some(Layout::Database) => self.load_from_database(),
            None if name == DATABASE_LAYOUT => self.load_from_database(),
            None => Ok(LayoutTriplet::identity()),
        }
    }

    fn render_files(&self, name: &str, files: &LayoutFiles) -> Result<LayoutTriplet, ComposeError> {
        if files.is_empty() {
            return Err(ComposeError::InvalidLayoutConfig {
                name: name.to_string(),
                reason: "files descriptor references no view".to_string(),
            });
        }

        let render = |path: &Option<std::path::PathBuf>, fallback: &str| match path {
            Some(path) => self.renderer.render(path).map_err(|e| {
                ComposeError::InvalidLayoutConfig {
                    name: name.to_string(),
                    reason: format!("cannot render '{}': {}", path.display(), e),
                }
            }),
            None => Ok(fallback.to_string()),
        };

        Ok(LayoutTriplet {
            text: render(&files.text, CONTENT_MARKER)?,
            html: render(&files.html, CONTENT_MARKER)?,
            css: render(&files.css, "")?,
        })
    }

    fn load_from_database(&self) -> Result<LayoutTriplet, ComposeError> {
        let Some(db) = &self.db else {
            return Ok(LayoutTriplet::identity());
        };

        match template_repo::find_by_code(db, LAYOUT_TEMPLATE_CODE)? {
            Some(template) => Ok(LayoutTriplet {
                text: template
                    .content_text
                    .unwrap_or_else(|| CONTENT_MARKER.to_string()),
                html: template
                    .content_html
                    .unwrap_or_else(|| CONTENT_MARKER.to_string()),
                css: template.styles.unwrap_or_default(),
            }),
            None => Ok(LayoutTriplet::identity()),
        }
    }
}
