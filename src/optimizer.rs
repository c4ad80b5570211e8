use crate::config::BacktestConfig;
use crate::engine::Engine;
use crate::models::{BacktestResult, Candle};
use crate::param_utils::format_parameters;
use crate::performance::{PerformanceCalculator, TradeStats};
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Candidate values per swept parameter. An empty list keeps the base value.
#[derive(Debug, Clone, Default)]
pub struct SweepGrid {
    pub ema_fast: Vec<usize>,
    pub ema_slow: Vec<usize>,
    pub risk_per_trade: Vec<f64>,
    pub stop_loss_pct: Vec<f64>,
}

impl SweepGrid {
    /// Cartesian product of the grid. Combinations whose fast span is not
    /// below the slow span are dropped, with `base` supplying any span that is
    /// not swept.
    pub fn variations(&self, base: &BacktestConfig) -> Vec<HashMap<String, f64>> {
        let axes: [(&str, Vec<f64>); 4] = [
            ("emaFast", self.ema_fast.iter().map(|&v| v as f64).collect()),
            ("emaSlow", self.ema_slow.iter().map(|&v| v as f64).collect()),
            ("riskPerTrade", self.risk_per_trade.clone()),
            ("stopLossPct", self.stop_loss_pct.clone()),
        ];

        let mut variations = vec![HashMap::new()];
        for (key, values) in axes.iter() {
            if values.is_empty() {
                continue;
            }
            let mut expanded = Vec::with_capacity(variations.len() * values.len());
            for base in &variations {
                for &value in values {
                    let mut next: HashMap<String, f64> = base.clone();
                    next.insert(key.to_string(), value);
                    expanded.push(next);
                }
            }
            variations = expanded;
        }

        variations.retain(|params| {
            let fast = params
                .get("emaFast")
                .copied()
                .unwrap_or(base.ema_fast_span as f64);
            let slow = params
                .get("emaSlow")
                .copied()
                .unwrap_or(base.ema_slow_span as f64);
            fast < slow
        });
        variations
    }
}

#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub id: usize,
    pub parameters: HashMap<String, f64>,
    pub config: BacktestConfig,
    pub result: BacktestResult,
    pub stats: TradeStats,
}

#[derive(Debug, Clone)]
pub struct SweepFailure {
    pub id: usize,
    pub parameters: HashMap<String, f64>,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    /// Ordered by final balance, best first.
    pub outcomes: Vec<SweepOutcome>,
    pub failures: Vec<SweepFailure>,
}

struct SweepTask {
    id: usize,
    parameters: HashMap<String, f64>,
}

type SweepTaskResult = std::result::Result<SweepOutcome, SweepFailure>;

/// Runs independent backtests over shared, read-only candles. Each task builds
/// its own engine and run state.
pub struct Optimizer {
    base_config: BacktestConfig,
    candles: Arc<Vec<Candle>>,
    worker_limit: Option<usize>,
    show_progress: bool,
}

impl Optimizer {
    pub fn new(base_config: BacktestConfig, candles: Arc<Vec<Candle>>) -> Self {
        Self {
            base_config,
            candles,
            worker_limit: None,
            show_progress: true,
        }
    }

    pub fn with_worker_limit(mut self, workers: usize) -> Self {
        self.worker_limit = Some(workers.max(1));
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn run(&self, variations: &[HashMap<String, f64>]) -> Result<SweepReport> {
        if variations.is_empty() {
            return Ok(SweepReport::default());
        }

        let variation_count = variations.len();
        info!(
            "Running {} backtests over {} candles...",
            variation_count,
            self.candles.len()
        );

        let cpu_budget = self.worker_limit.unwrap_or_else(|| num_cpus::get().max(1));
        let num_workers = variation_count.min(cpu_budget);
        info!("Using {} worker threads", num_workers);

        let (tx, rx): (Sender<SweepTask>, Receiver<SweepTask>) = bounded(variation_count);
        let (result_tx, result_rx): (Sender<SweepTaskResult>, Receiver<SweepTaskResult>) =
            bounded(variation_count);

        let mut handles = Vec::with_capacity(num_workers);
        for _worker_id in 0..num_workers {
            let rx = rx.clone();
            let result_tx = result_tx.clone();
            let candles = Arc::clone(&self.candles);
            let base_config = self.base_config.clone();

            let handle = thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    let start_time = Instant::now();
                    let result = Self::run_single_backtest(&base_config, &candles, task);
                    match &result {
                        Ok(outcome) => info!(
                            "Finished variation {} in {:.2}s. Final balance: {:.4}, Trades: {}, Params: [{}]",
                            outcome.id,
                            start_time.elapsed().as_secs_f64(),
                            outcome.result.final_balance,
                            outcome.stats.total_trades,
                            format_parameters(&outcome.parameters)
                        ),
                        Err(failure) => warn!(
                            "Variation {} rejected: {} (Params: [{}])",
                            failure.id,
                            failure.error,
                            format_parameters(&failure.parameters)
                        ),
                    }

                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            });
            handles.push(handle);
        }
        drop(rx);
        drop(result_tx);

        for (id, parameters) in variations.iter().enumerate() {
            tx.send(SweepTask {
                id,
                parameters: parameters.clone(),
            })?;
        }
        drop(tx);

        let pb = if self.show_progress {
            let pb = ProgressBar::new(variation_count as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                    )?
                    .progress_chars("#>-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut report = SweepReport::default();
        let mut completed = 0;
        while completed < variation_count {
            match result_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(result) => {
                    completed += 1;
                    pb.set_position(completed as u64);
                    match result {
                        Ok(outcome) => report.outcomes.push(outcome),
                        Err(failure) => report.failures.push(failure),
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Result channel closed unexpectedly. Some results may be lost.");
                    break;
                }
            }
        }

        if report.failures.is_empty() {
            pb.finish_with_message("Sweep completed");
        } else {
            warn!(
                "Sweep completed with {} rejected variations",
                report.failures.len()
            );
            pb.finish_with_message("Sweep completed with errors");
        }

        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow!("Sweep worker thread panicked"))?;
        }

        report.outcomes.sort_by(|a, b| {
            b.result
                .final_balance
                .total_cmp(&a.result.final_balance)
                .then(a.id.cmp(&b.id))
        });
        report.failures.sort_by_key(|failure| failure.id);
        Ok(report)
    }

    fn run_single_backtest(
        base_config: &BacktestConfig,
        candles: &[Candle],
        task: SweepTask,
    ) -> SweepTaskResult {
        let config = base_config.with_parameters(&task.parameters);
        let engine = Engine::new(config.clone());
        match engine.backtest(candles) {
            Ok(result) => {
                let stats = PerformanceCalculator::calculate(&result);
                Ok(SweepOutcome {
                    id: task.id,
                    parameters: task.parameters,
                    config,
                    result,
                    stats,
                })
            }
            Err(err) => Err(SweepFailure {
                id: task.id,
                parameters: task.parameters,
                error: err.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_expands_and_drops_inverted_spans() {
        let grid = SweepGrid {
            ema_fast: vec![5, 8, 21],
            ema_slow: vec![13, 21],
            risk_per_trade: vec![0.01, 0.02],
            stop_loss_pct: Vec::new(),
        };
        let variations = grid.variations(&BacktestConfig::default());
        // (5,13) (5,21) (8,13) (8,21) survive; 21 is never below a slow span.
        assert_eq!(variations.len(), 4 * 2);
        for params in &variations {
            assert!(params["emaFast"] < params["emaSlow"]);
            assert!(!params.contains_key("stopLossPct"));
        }
    }

    #[test]
    fn empty_grid_yields_the_base_variation() {
        let variations = SweepGrid::default().variations(&BacktestConfig::default());
        assert_eq!(variations.len(), 1);
        assert!(variations[0].is_empty());
    }

    #[test]
    fn single_span_axis_is_checked_against_the_base() {
        let grid = SweepGrid {
            ema_fast: vec![5, 21, 34],
            ..SweepGrid::default()
        };
        let base = BacktestConfig::default();
        let variations = grid.variations(&base);
        assert_eq!(variations.len(), 1);
        assert_eq!(variations[0]["emaFast"], 5.0);

        let grid = SweepGrid {
            ema_slow: vec![5, 13],
            ..SweepGrid::default()
        };
        let variations = grid.variations(&base);
        assert_eq!(variations.len(), 1);
        assert_eq!(variations[0]["emaSlow"], 13.0);
    }

    #[test]
    fn empty_variation_list_is_a_no_op() {
        let optimizer = Optimizer::new(BacktestConfig::default(), Arc::new(Vec::new()))
            .with_progress(false);
        let report = optimizer.run(&[]).unwrap();
        assert!(report.outcomes.is_empty());
        assert!(report.failures.is_empty());
    }
}
