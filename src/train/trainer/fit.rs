//! The fit loop

use std::time::Instant;

use super::core::Trainer;
use super::result::TrainResult;
use crate::data::DataProvider;
use crate::error::Result;
use crate::model::{Metrics, TrainableModel};
use crate::train::callback::{CallbackAction, CallbackContext, RunHandle};
use crate::train::logger::RunStatus;

#[derive(Clone, Copy, Debug)]
enum Event {
    TrainBegin,
    EpochBegin,
    TrainBatchStart,
    TrainBatchEnd,
    ValidationEnd,
    EpochEnd,
    TrainEnd,
}

impl Trainer {
    /// Train `model` on `data` until `max_epochs` or a callback requests a stop.
    ///
    /// `data` must already be set up. Per epoch: training steps, a full
    /// validation pass (metrics go to `on_validation_end`), the model's
    /// `on_train_epoch_end`, then `on_epoch_end` callbacks. Any error aborts
    /// the run; the logger is finalised as `failed` and the error returned
    /// unchanged.
    pub fn fit(&mut self, model: &mut dyn TrainableModel, data: &dyn DataProvider) -> Result<TrainResult> {
        self.start_time = Some(Instant::now());
        self.global_step = 0;
        self.callback_metrics.clear();

        let outcome = self.run_fit(model, data);
        let status = if outcome.is_ok() {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        let finalized = self.logger.finalize(status);
        match outcome {
            Ok(result) => {
                finalized?;
                Ok(result)
            }
            Err(e) => {
                if let Err(f) = finalized {
                    tracing::warn!("Failed to finalise logger: {f}");
                }
                Err(e)
            }
        }
    }

    fn run_fit(&mut self, model: &mut dyn TrainableModel, data: &dyn DataProvider) -> Result<TrainResult> {
        let max_epochs = self.config.max_epochs;
        let steps_per_epoch = data.num_train_batches();

        model.configure_optimizers(max_epochs)?;
        self.logger.log_hyperparams(&model.hyperparameters())?;

        let ctx = self.build_context(&*model, 0, 0, steps_per_epoch, None);
        let mut should_stop = self.fire(Event::TrainBegin, &ctx, &*model)? == CallbackAction::Stop;

        if !should_stop {
            self.sanity_check(model, data)?;
        }

        let mut epochs_completed: usize = 0;
        for epoch in 0..max_epochs {
            if should_stop {
                break;
            }
            let ctx = self.build_context(&*model, epoch, 0, steps_per_epoch, None);
            should_stop |= self.fire(Event::EpochBegin, &ctx, &*model)? == CallbackAction::Stop;

            let train_loss_epoch = self.train_epoch(model, data, epoch, &mut should_stop)?;

            let metrics = self.validation_pass(model, data, None)?;
            if !metrics.is_empty() {
                let mut logged = metrics.clone();
                logged.insert("epoch".into(), epoch as f64);
                self.logger.log_metrics(&logged, self.global_step)?;
                self.callback_metrics.extend(metrics);
            }
            let ctx = self.build_context(&*model, epoch, steps_per_epoch, steps_per_epoch, None);
            should_stop |= self.fire(Event::ValidationEnd, &ctx, &*model)? == CallbackAction::Stop;

            model.on_train_epoch_end(epoch)?;
            if let Some(loss) = train_loss_epoch {
                let logged = Metrics::from([
                    ("train_loss_epoch".to_string(), loss),
                    ("epoch".to_string(), epoch as f64),
                ]);
                self.logger.log_metrics(&logged, self.global_step)?;
                self.callback_metrics.insert("train_loss_epoch".into(), loss);
            }

            let ctx = self.build_context(&*model, epoch, steps_per_epoch, steps_per_epoch, train_loss_epoch);
            should_stop |= self.fire(Event::EpochEnd, &ctx, &*model)? == CallbackAction::Stop;
            epochs_completed += 1;
        }

        let last_epoch = epochs_completed.saturating_sub(1);
        let ctx = self.build_context(&*model, last_epoch, 0, steps_per_epoch, None);
        self.fire(Event::TrainEnd, &ctx, &*model)?;

        if should_stop {
            tracing::info!("Training stopped by a callback after {epochs_completed} epoch(s)");
        } else {
            tracing::info!("`Trainer.fit` stopped: `max_epochs={max_epochs}` reached.");
        }

        let best = self
            .callbacks
            .best_model()
            .map(|(path, score)| (path.to_path_buf(), score));
        Ok(TrainResult {
            epochs_completed,
            global_step: self.global_step,
            stopped_early: should_stop,
            best_model_path: best.as_ref().map(|(p, _)| p.clone()),
            best_model_score: best.map(|(_, s)| s),
            elapsed_secs: self.start_time.map_or(0.0, |t| t.elapsed().as_secs_f64()),
        })
    }

    /// Run the first `num_sanity_val_steps` validation batches and discard the results.
    fn sanity_check(&mut self, model: &mut dyn TrainableModel, data: &dyn DataProvider) -> Result<()> {
        let limit = self.config.num_sanity_val_steps.min(data.num_val_batches());
        if limit == 0 {
            return Ok(());
        }
        tracing::debug!("Sanity checking {limit} validation batch(es)");
        self.validation_pass(model, data, Some(limit))?;
        Ok(())
    }

    fn validation_pass(
        &mut self,
        model: &mut dyn TrainableModel,
        data: &dyn DataProvider,
        limit: Option<usize>,
    ) -> Result<Metrics> {
        for batch in data.val_batches()?.take(limit.unwrap_or(usize::MAX)) {
            model.validation_step(&batch?)?;
        }
        model.on_validation_epoch_end()
    }

    /// Returns the mean training loss of the epoch, or `None` without batches.
    fn train_epoch(
        &mut self,
        model: &mut dyn TrainableModel,
        data: &dyn DataProvider,
        epoch: usize,
        should_stop: &mut bool,
    ) -> Result<Option<f64>> {
        let steps_per_epoch = data.num_train_batches();
        let log_every = self.config.log_every_n_steps.max(1);
        let mut total = 0.0;
        let mut count = 0usize;

        for (step, batch) in data.train_batches(epoch)?.enumerate() {
            let batch = batch?;
            let ctx = self.build_context(&*model, epoch, step, steps_per_epoch, None);
            *should_stop |= self.fire(Event::TrainBatchStart, &ctx, &*model)? == CallbackAction::Stop;

            let loss = model.training_step(&batch, self.global_step)?;
            self.global_step += 1;
            total += loss;
            count += 1;

            self.callback_metrics.insert("train_loss".into(), loss);
            if self.global_step % log_every == 0 {
                let logged = Metrics::from([
                    ("train_loss".to_string(), loss),
                    ("epoch".to_string(), epoch as f64),
                ]);
                self.logger.log_metrics(&logged, self.global_step)?;
            }

            let ctx = self.build_context(&*model, epoch, step, steps_per_epoch, Some(loss));
            *should_stop |= self.fire(Event::TrainBatchEnd, &ctx, &*model)? == CallbackAction::Stop;
        }

        Ok((count > 0).then(|| total / count as f64))
    }

    fn fire(&mut self, event: Event, ctx: &CallbackContext, model: &dyn TrainableModel) -> Result<CallbackAction> {
        let mut run = RunHandle::new(self.logger.as_mut(), model);
        let callbacks = &mut self.callbacks;
        match event {
            Event::TrainBegin => callbacks.on_train_begin(ctx, &mut run),
            Event::EpochBegin => callbacks.on_epoch_begin(ctx, &mut run),
            Event::TrainBatchStart => callbacks.on_train_batch_start(ctx, &mut run),
            Event::TrainBatchEnd => callbacks.on_train_batch_end(ctx, &mut run),
            Event::ValidationEnd => callbacks.on_validation_end(ctx, &mut run),
            Event::EpochEnd => callbacks.on_epoch_end(ctx, &mut run),
            Event::TrainEnd => callbacks
                .on_train_end(ctx, &mut run)
                .map(|()| CallbackAction::Continue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Batch, BatchIter};
    use crate::error::Error;
    use crate::train::callback::{EarlyStopping, MonitorMode, TrainerCallback};
    use crate::train::logger::{Logger, MemoryLogger};
    use crate::train::trainer::TrainerConfig;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    type Journal = Arc<Mutex<Vec<String>>>;

    fn note(journal: &Journal, entry: impl Into<String>) {
        journal.lock().unwrap().push(entry.into());
    }

    /// Provider yielding empty batches
    struct CountingData {
        train: usize,
        val: usize,
    }

    impl DataProvider for CountingData {
        fn setup(&mut self) -> Result<()> {
            Ok(())
        }

        fn train_batches(&self, _epoch: usize) -> Result<BatchIter<'_>> {
            Ok(Box::new((0..self.train).map(|i| Ok::<_, Error>(Batch::new(i, Vec::new())))))
        }

        fn val_batches(&self) -> Result<BatchIter<'_>> {
            Ok(Box::new((0..self.val).map(|i| Ok::<_, Error>(Batch::new(i, Vec::new())))))
        }

        fn num_train_batches(&self) -> usize {
            self.train
        }

        fn num_val_batches(&self) -> usize {
            self.val
        }
    }

    /// Model whose validation loss follows a script
    struct ScriptedModel {
        val_losses: Vec<f64>,
        checks: usize,
        journal: Journal,
        fail_at_step: Option<usize>,
    }

    impl ScriptedModel {
        fn new(val_losses: Vec<f64>, journal: &Journal) -> Self {
            Self {
                val_losses,
                checks: 0,
                journal: Arc::clone(journal),
                fail_at_step: None,
            }
        }
    }

    impl TrainableModel for ScriptedModel {
        fn configure_optimizers(&mut self, max_epochs: usize) -> Result<()> {
            note(&self.journal, format!("configure({max_epochs})"));
            Ok(())
        }

        fn training_step(&mut self, _batch: &Batch, global_step: usize) -> Result<f64> {
            if self.fail_at_step == Some(global_step) {
                return Err(Error::training("diverged"));
            }
            note(&self.journal, "train_step");
            Ok(1.0 / (global_step + 1) as f64)
        }

        fn validation_step(&mut self, _batch: &Batch) -> Result<()> {
            note(&self.journal, "val_step");
            Ok(())
        }

        fn on_validation_epoch_end(&mut self) -> Result<Metrics> {
            note(&self.journal, "val_epoch_end");
            let loss = self
                .val_losses
                .get(self.checks)
                .or(self.val_losses.last())
                .copied()
                .unwrap_or(1.0);
            self.checks += 1;
            Ok(Metrics::from([("val_loss".to_string(), loss)]))
        }

        fn on_train_epoch_end(&mut self, epoch: usize) -> Result<()> {
            note(&self.journal, format!("train_epoch_end({epoch})"));
            Ok(())
        }

        fn learning_rates(&self) -> Vec<(String, f64)> {
            vec![("lr-Adam".to_string(), 1e-3)]
        }

        fn hyperparameters(&self) -> BTreeMap<String, serde_json::Value> {
            BTreeMap::new()
        }

        fn state_dict(&self) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        fn load_state_dict(&mut self, _state: serde_json::Value) -> Result<()> {
            Ok(())
        }
    }

    struct Recorder(Journal);

    impl TrainerCallback for Recorder {
        fn on_train_begin(&mut self, _: &CallbackContext, _: &mut RunHandle<'_>) -> Result<CallbackAction> {
            note(&self.0, "cb:train_begin");
            Ok(CallbackAction::Continue)
        }

        fn on_epoch_begin(&mut self, _: &CallbackContext, _: &mut RunHandle<'_>) -> Result<CallbackAction> {
            note(&self.0, "cb:epoch_begin");
            Ok(CallbackAction::Continue)
        }

        fn on_train_batch_end(&mut self, ctx: &CallbackContext, _: &mut RunHandle<'_>) -> Result<CallbackAction> {
            note(&self.0, format!("cb:batch_end(step={})", ctx.global_step));
            Ok(CallbackAction::Continue)
        }

        fn on_validation_end(&mut self, ctx: &CallbackContext, _: &mut RunHandle<'_>) -> Result<CallbackAction> {
            note(&self.0, format!("cb:validation_end({:?})", ctx.metrics.get("val_loss")));
            Ok(CallbackAction::Continue)
        }

        fn on_epoch_end(&mut self, _: &CallbackContext, _: &mut RunHandle<'_>) -> Result<CallbackAction> {
            note(&self.0, "cb:epoch_end");
            Ok(CallbackAction::Continue)
        }

        fn on_train_end(&mut self, _: &CallbackContext, _: &mut RunHandle<'_>) -> Result<()> {
            note(&self.0, "cb:train_end");
            Ok(())
        }
    }

    /// Logger shared with the test body
    #[derive(Clone, Default)]
    struct SharedLogger(Arc<Mutex<MemoryLogger>>);

    impl Logger for SharedLogger {
        fn log_hyperparams(&mut self, params: &BTreeMap<String, serde_json::Value>) -> Result<()> {
            self.0.lock().unwrap().log_hyperparams(params)
        }

        fn log_metrics(&mut self, metrics: &Metrics, step: usize) -> Result<()> {
            self.0.lock().unwrap().log_metrics(metrics, step)
        }

        fn finalize(&mut self, status: RunStatus) -> Result<()> {
            self.0.lock().unwrap().finalize(status)
        }
    }

    fn trainer(config: TrainerConfig, logger: &SharedLogger) -> Trainer {
        Trainer::new(config, Box::new(logger.clone())).unwrap()
    }

    #[test]
    fn test_hook_order() {
        let journal = Journal::default();
        let logger = SharedLogger::default();
        let mut trainer = trainer(
            TrainerConfig {
                num_sanity_val_steps: 1,
                ..TrainerConfig::new(1)
            },
            &logger,
        );
        trainer.add_callback(Recorder(Arc::clone(&journal)));
        let mut model = ScriptedModel::new(vec![0.5], &journal);

        let result = trainer.fit(&mut model, &CountingData { train: 2, val: 2 }).unwrap();
        assert_eq!(result.epochs_completed, 1);
        assert_eq!(result.global_step, 2);
        assert!(!result.stopped_early);

        let journal = journal.lock().unwrap().clone();
        assert_eq!(
            journal,
            vec![
                "configure(1)",
                "cb:train_begin",
                // sanity check: one batch, results discarded
                "val_step",
                "val_epoch_end",
                "cb:epoch_begin",
                "train_step",
                "cb:batch_end(step=1)",
                "train_step",
                "cb:batch_end(step=2)",
                "val_step",
                "val_step",
                "val_epoch_end",
                "cb:validation_end(Some(0.5))",
                "train_epoch_end(0)",
                "cb:epoch_end",
                "cb:train_end",
            ]
        );
    }

    #[test]
    fn test_runs_to_max_epochs() {
        let journal = Journal::default();
        let logger = SharedLogger::default();
        let mut trainer = trainer(
            TrainerConfig {
                log_every_n_steps: 2,
                num_sanity_val_steps: 0,
                ..TrainerConfig::new(4)
            },
            &logger,
        );
        let mut model = ScriptedModel::new(vec![0.9, 0.8, 0.7, 0.6], &journal);

        let result = trainer.fit(&mut model, &CountingData { train: 3, val: 1 }).unwrap();
        assert_eq!(result.epochs_completed, 4);
        assert_eq!(result.global_step, 12);
        assert!(!result.stopped_early);
        assert!(result.best_model_path.is_none());

        let logger = logger.0.lock().unwrap();
        assert_eq!(logger.status, Some(RunStatus::Success));
        let steps: Vec<usize> = logger.series("train_loss").into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![2, 4, 6, 8, 10, 12]);
        assert_eq!(logger.series("val_loss").len(), 4);
        assert_eq!(logger.series("train_loss_epoch").len(), 4);
        assert_eq!(trainer.callback_metrics()["val_loss"], 0.6);
    }

    #[test]
    fn test_early_stopping_ends_run() {
        let journal = Journal::default();
        let logger = SharedLogger::default();
        let mut trainer = trainer(TrainerConfig::new(50), &logger);
        trainer.add_callback(EarlyStopping::new("val_loss", MonitorMode::Min, 10));
        let mut model = ScriptedModel::new(vec![0.5], &journal);

        let result = trainer.fit(&mut model, &CountingData { train: 2, val: 1 }).unwrap();
        assert!(result.stopped_early);
        assert_eq!(result.epochs_completed, 11);
        assert_eq!(result.global_step, 22);
        assert_eq!(logger.0.lock().unwrap().status, Some(RunStatus::Success));
    }

    #[test]
    fn test_error_finalizes_as_failed() {
        let journal = Journal::default();
        let logger = SharedLogger::default();
        let mut trainer = trainer(TrainerConfig::new(3), &logger);
        let mut model = ScriptedModel::new(vec![0.5], &journal);
        model.fail_at_step = Some(3);

        let err = trainer
            .fit(&mut model, &CountingData { train: 2, val: 1 })
            .unwrap_err();
        assert!(err.to_string().contains("diverged"));
        assert_eq!(logger.0.lock().unwrap().status, Some(RunStatus::Failed));
        assert_eq!(trainer.global_step(), 3);
    }

    #[test]
    fn test_stop_on_train_begin_skips_epochs() {
        struct Veto;
        impl TrainerCallback for Veto {
            fn on_train_begin(&mut self, _: &CallbackContext, _: &mut RunHandle<'_>) -> Result<CallbackAction> {
                Ok(CallbackAction::Stop)
            }
        }

        let journal = Journal::default();
        let logger = SharedLogger::default();
        let mut trainer = trainer(TrainerConfig::new(3), &logger);
        trainer.add_callback(Veto);
        let mut model = ScriptedModel::new(vec![0.5], &journal);
        let result = trainer.fit(&mut model, &CountingData { train: 2, val: 1 }).unwrap();
        assert_eq!(result.epochs_completed, 0);
        assert!(result.stopped_early);
        assert!(!journal.lock().unwrap().iter().any(|e| e == "train_step"));
    }
}
