#![forbid(unsafe_code)]

use crate::GenerationError;
use crate::emitter::{CEmitter, FixtureEmitter, TestCase};
use std::fs;
use std::path::Path;

/// Ordered accumulator of generated test blocks.
///
/// Nothing touches the filesystem until [`TestSuite::save`]; blocks render in the
/// order they were added.
#[derive(Debug, Clone)]
pub struct TestSuite<E = CEmitter> {
    emitter: E,
    preamble: Option<String>,
    footer: Option<String>,
    auxiliary: Vec<String>,
    cases: Vec<TestCase>,
}

impl<E: FixtureEmitter> TestSuite<E> {
    pub fn new(emitter: E) -> Self {
        Self {
            emitter,
            preamble: None,
            footer: None,
            auxiliary: Vec::new(),
            cases: Vec::new(),
        }
    }

    /// Replaces the emitter's default preamble, e.g. with a harness-owned header.
    #[must_use]
    pub fn with_preamble(mut self, preamble: Option<String>) -> Self {
        self.preamble = preamble;
        self
    }

    /// Replaces the emitter's generated runner.
    #[must_use]
    pub fn with_footer(mut self, footer: Option<String>) -> Self {
        self.footer = footer;
        self
    }

    pub fn emitter(&self) -> &E {
        &self.emitter
    }

    pub fn add_test(&mut self, name: impl Into<String>, body: impl Into<String>) {
        self.cases.push(TestCase {
            name: name.into(),
            body: body.into(),
        });
    }

    /// Adds a declaration placed ahead of every test block.
    pub fn raw_append(&mut self, text: impl Into<String>) {
        self.auxiliary.push(text.into());
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn auxiliary(&self) -> &[String] {
        &self.auxiliary
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = match &self.preamble {
            Some(preamble) => preamble.clone(),
            None => self.emitter.preamble(),
        };
        for aux in &self.auxiliary {
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(aux);
        }
        for (ordinal, case) in self.cases.iter().enumerate() {
            out.push_str(&self.emitter.test_block(ordinal, case));
        }
        match &self.footer {
            Some(footer) => out.push_str(footer),
            None => out.push_str(&self.emitter.runner(&self.cases)),
        }
        out
    }

    /// Writes the whole suite to `path`, replacing any previous content.
    pub fn save(&self, path: &Path) -> Result<String, GenerationError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| GenerationError::Persistence {
                path: parent.to_path_buf(),
                message: err.to_string(),
            })?;
        }
        let rendered = self.render();
        fs::write(path, rendered.as_bytes()).map_err(|err| GenerationError::Persistence {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Ok(rendered)
    }
}

impl Default for TestSuite<CEmitter> {
    fn default() -> Self {
        Self::new(CEmitter::new())
    }
}
