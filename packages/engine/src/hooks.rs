//! # Recompute Hooks
//!
//! Some leaves are derived from others (a total weight, a wound threshold).
//! After the session applies a change, every registered hook re-derives its
//! state exactly once, however many fields the change touched.
//!
//! Hooks write the document directly and never produce outgoing messages;
//! every collaborator derives the same values locally.

use sheetsync_document::{Document, DocumentError, Path, Value};

/// Re-derives computed state after the document changed.
pub trait RecomputeHook: std::fmt::Debug + Send {
    /// Returns how many leaves were rewritten.
    fn recompute(&self, doc: &mut Document) -> Result<usize, DocumentError>;
}

/// A numeric leaf computed from other numeric leaves.
///
/// Missing or non-numeric sources count as 0. A target that does not exist
/// is skipped.
#[derive(Clone)]
pub struct DerivedField {
    target: Path,
    sources: Vec<Path>,
    combine: fn(&[f64]) -> f64,
}

impl std::fmt::Debug for DerivedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedField")
            .field("target", &self.target)
            .field("sources", &self.sources)
            .finish()
    }
}

impl DerivedField {
    pub fn new(target: Path, sources: Vec<Path>, combine: fn(&[f64]) -> f64) -> Self {
        Self {
            target,
            sources,
            combine,
        }
    }

    pub fn sum(target: Path, sources: Vec<Path>) -> Self {
        Self::new(target, sources, |values| values.iter().sum())
    }
}

impl RecomputeHook for DerivedField {
    fn recompute(&self, doc: &mut Document) -> Result<usize, DocumentError> {
        let Some(target) = doc.resolve(&self.target) else {
            return Ok(0);
        };
        let inputs: Vec<f64> = self
            .sources
            .iter()
            .map(|p| doc.value_at(p).and_then(Value::as_f64).unwrap_or(0.0))
            .collect();
        let next = Value::Number((self.combine)(&inputs));
        if doc.value(target) == Some(&next) {
            return Ok(0);
        }
        doc.set_value(target, next)?;
        Ok(1)
    }
}

/// Runs every registered hook.
#[derive(Debug, Default)]
pub struct RecomputeEngine {
    hooks: Vec<Box<dyn RecomputeHook>>,
    runs: u64,
}

impl RecomputeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: impl RecomputeHook + 'static) {
        self.hooks.push(Box::new(hook));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// How many times the hooks have been run.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Run all hooks once. A failing hook is logged and skipped.
    pub fn run(&mut self, doc: &mut Document) -> usize {
        self.runs += 1;
        let mut rewritten = 0;
        for hook in &self.hooks {
            match hook.recompute(doc) {
                Ok(n) => rewritten += n,
                Err(e) => tracing::warn!(hook = ?hook, error = %e, "Recompute hook failed"),
            }
        }
        rewritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetsync_document::Template;

    fn path(raw: &str) -> Path {
        Path::parse(raw).unwrap()
    }

    #[test]
    fn test_derived_sum() {
        let mut doc = Document::from_template(&Template::group([
            ("strength", Template::leaf(3.0)),
            ("toughness", Template::leaf("4")),
            ("wounds", Template::leaf(0.0)),
        ]))
        .unwrap();

        let mut engine = RecomputeEngine::new();
        engine.register(DerivedField::sum(
            path("wounds"),
            vec![path("strength"), path("toughness"), path("missing")],
        ));

        assert_eq!(engine.run(&mut doc), 1);
        assert_eq!(doc.value_at(&path("wounds")), Some(&Value::Number(7.0)));
        // Already up to date
        assert_eq!(engine.run(&mut doc), 0);
        assert_eq!(engine.runs(), 2);
    }

    #[test]
    fn test_missing_target_is_skipped() {
        let mut doc = Document::new();
        let hook = DerivedField::sum(path("nowhere"), vec![]);
        assert_eq!(hook.recompute(&mut doc), Ok(0));
    }
}
