use std::fmt;

use crate::evaluation::Evaluation;
use crate::metrics::Metric;
use crate::tuning::{Candidate, TuningResults};

/// Everything known about one model after tuning and the final fit.
#[derive(Debug, Clone)]
pub struct ModelReport {
    pub tuning: TuningResults,
    pub evaluation: Evaluation,
}

#[derive(Debug, Clone)]
pub struct ComparisonReport {
    pub metric: Metric,
    /// How many cross-validation candidates to list per model.
    pub top_n: usize,
    pub models: Vec<ModelReport>,
}

impl ComparisonReport {
    pub fn new(metric: Metric, top_n: usize) -> Self {
        Self {
            metric,
            top_n,
            models: Vec::new(),
        }
    }

    pub fn push(&mut self, tuning: TuningResults, evaluation: Evaluation) {
        self.models.push(ModelReport { tuning, evaluation });
    }

    /// Highest test value of the selection metric; NaN scores never lead.
    pub fn best(&self) -> Option<&ModelReport> {
        let score = |m: &ModelReport| m.evaluation.metrics.get(self.metric);
        self.models
            .iter()
            .filter(|m| !score(m).is_nan())
            .fold(None, |best: Option<&ModelReport>, m| match best {
                Some(b) if score(b) >= score(m) => Some(b),
                _ => Some(m),
            })
    }
}

fn write_candidate(f: &mut fmt::Formatter<'_>, c: &Candidate) -> fmt::Result {
    writeln!(
        f,
        "    {:<8} accuracy {:.3} (se {:.3})  roc_auc {:.3} (se {:.3})  n={}  {}",
        c.config,
        c.accuracy.mean,
        c.accuracy.std_err,
        c.roc_auc.mean,
        c.roc_auc.std_err,
        c.roc_auc.n,
        c.params
    )
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model comparison (selection metric: {})", self.metric)?;
        if let Some(first) = self.models.first() {
            let balance = first.evaluation.test_balance;
            writeln!(
                f,
                "Test partition: {} records, {} negative / {} positive ({:.1}% positive)",
                balance.total(),
                balance.negative,
                balance.positive,
                balance.positive_rate() * 100.0
            )?;
        }
        writeln!(f)?;

        writeln!(f, "{:<22} {:>9} {:>9}", "model", "accuracy", "roc_auc")?;
        for m in &self.models {
            writeln!(
                f,
                "{:<22} {:>9.3} {:>9.3}",
                m.evaluation.model, m.evaluation.metrics.accuracy, m.evaluation.metrics.roc_auc
            )?;
        }

        for m in &self.models {
            let e = &m.evaluation;
            let cm = e.confusion;
            writeln!(f)?;
            writeln!(f, "== {} ==", e.model)?;
            writeln!(f, "  hyperparameters: {}", e.params)?;
            writeln!(f, "  confusion matrix (rows truth, columns predicted):")?;
            writeln!(f, "    {:>10} {:>10}", "pred 0", "pred 1")?;
            writeln!(f, "    true 0 {:>6} {:>10}", cm.true_negative, cm.false_positive)?;
            writeln!(f, "    true 1 {:>6} {:>10}", cm.false_negative, cm.true_positive)?;
            writeln!(f, "  cross-validation, best by {}:", self.metric)?;
            for c in m.tuning.show_best(self.metric, self.top_n) {
                write_candidate(f, c)?;
            }
        }

        if let Some(best) = self.best() {
            writeln!(f)?;
            writeln!(
                f,
                "Best on test by {}: {} ({:.3})",
                self.metric,
                best.evaluation.model,
                best.evaluation.metrics.get(self.metric)
            )?;
        }
        Ok(())
    }
}
