use crate::channel::ChannelSet;
use crate::command::Pipeline;
use crate::config::{OrchestratorConfig, SpawnFailurePolicy};
use crate::error::{PipelineError, SyntaxError};
use crate::launcher::{ForkExec, Launcher, PreparedStage, retry_eintr};
use crate::report::{ExitStatus, StageReport};
use crate::stage::{self, Wiring};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait;
use nix::unistd::Pid;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Runs a [`Pipeline`]: one process per command, pipes in between.
///
/// The orchestrator reaps with wait-for-any-child, so it expects to be the only
/// code in the process waiting on children while a run is in progress.
///
/// Example
/// ```no_run
/// use pipesh::{Limits, Orchestrator, OrchestratorConfig, Tokenizer};
/// let pipeline = Tokenizer::new(Limits::default()).parse("printf abc | cat").unwrap();
/// let reports = Orchestrator::new(OrchestratorConfig::default()).run(&pipeline).unwrap();
/// assert!(reports.iter().all(|r| r.status.success()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    config: OrchestratorConfig,
}

/// Stages launched and not yet reaped, keyed by pid.
#[derive(Debug, Default)]
struct RunningStages {
    by_pid: HashMap<Pid, usize>,
}

impl RunningStages {
    fn insert(&mut self, pid: Pid, stage: usize) {
        self.by_pid.insert(pid, stage);
    }

    fn remove(&mut self, pid: Pid) -> Option<usize> {
        self.by_pid.remove(&pid)
    }

    fn is_empty(&self) -> bool {
        self.by_pid.is_empty()
    }

    fn len(&self) -> usize {
        self.by_pid.len()
    }

    fn terminate_all(&self) {
        for (&pid, &stage) in &self.by_pid {
            warn!(%pid, stage, "terminating stage");
            if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
                // already gone: it will still be reaped below
                debug!(%pid, error = %e, "kill failed");
            }
        }
    }
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run `pipeline` with real processes.
    ///
    /// Returns one report per stage, in the order the stages finished.
    pub fn run(&self, pipeline: &Pipeline) -> Result<Vec<StageReport>, PipelineError> {
        self.run_with(pipeline, &mut ForkExec)
    }

    /// Like [`run`](Self::run), calling `on_exit` for each stage as soon as it
    /// has been reaped, including stages reaped while giving up after a failure.
    pub fn run_observed<F>(
        &self,
        pipeline: &Pipeline,
        on_exit: F,
    ) -> Result<Vec<StageReport>, PipelineError>
    where
        F: FnMut(&StageReport),
    {
        self.run_with_observer(pipeline, &mut ForkExec, on_exit)
    }

    /// Run `pipeline`, creating processes through `launcher`.
    pub fn run_with<L: Launcher>(
        &self,
        pipeline: &Pipeline,
        launcher: &mut L,
    ) -> Result<Vec<StageReport>, PipelineError> {
        self.run_with_observer(pipeline, launcher, |_| ())
    }

    /// Run `pipeline` through `launcher`, reporting each completion to `on_exit`.
    pub fn run_with_observer<L, F>(
        &self,
        pipeline: &Pipeline,
        launcher: &mut L,
        mut on_exit: F,
    ) -> Result<Vec<StageReport>, PipelineError>
    where
        L: Launcher,
        F: FnMut(&StageReport),
    {
        let total = pipeline.len();
        if let Some(limit) = self.config.max_stages {
            if total > limit {
                return Err(SyntaxError::TooManyCommands { count: total, limit }.into());
            }
        }
        let argvs = pipeline
            .commands()
            .iter()
            .enumerate()
            .map(|(i, command)| command.to_argv(i))
            .collect::<Result<Vec<_>, _>>()?;

        let mut channels = ChannelSet::open(stage::channel_count(total)).map_err(|(index, source)| {
            error!(channel = index, error = %source, "could not create pipe");
            PipelineError::ChannelCreation { index, source }
        })?;

        let mut running = RunningStages::default();
        for (index, argv) in argvs.into_iter().enumerate() {
            let wiring = Wiring::of(index, total);

            let mut wired = [None, None];
            for (slot, end) in wired.iter_mut().zip([wiring.stdin, wiring.stdout]) {
                if let Some(end) = end {
                    match channels.raw(end) {
                        Some(fd) => *slot = Some(fd),
                        None => {
                            error!(stage = index, "{} already closed", end);
                            let reaped = self.abort(&mut channels, &mut running, &mut on_exit);
                            return Err(PipelineError::ChannelClosed {
                                stage: index,
                                end,
                                reaped,
                            });
                        }
                    }
                }
            }
            let [stdin, stdout] = wired;

            let prepared = PreparedStage {
                index,
                argv,
                stdin,
                stdout,
                close: channels.held(),
            };
            match launcher.launch(&prepared) {
                Ok(pid) => {
                    let command = &pipeline.commands()[index];
                    debug!(stage = index, %pid, %command, "launched");
                    running.insert(pid, index);
                    for end in wiring.ends() {
                        channels.release(end);
                    }
                }
                Err(source) => {
                    error!(stage = index, error = %source, "could not create process");
                    let reaped = self.abort(&mut channels, &mut running, &mut on_exit);
                    return Err(PipelineError::ProcessCreation {
                        stage: index,
                        source,
                        reaped,
                    });
                }
            }
        }
        debug_assert!(channels.held().is_empty());

        Ok(reap(&mut running, &mut on_exit))
    }

    /// Give up on a partially launched pipeline: close every end the parent
    /// still holds, apply the spawn failure policy, and reap what was started.
    fn abort(
        &self,
        channels: &mut ChannelSet,
        running: &mut RunningStages,
        on_exit: &mut dyn FnMut(&StageReport),
    ) -> Vec<StageReport> {
        channels.release_all();
        if self.config.on_spawn_failure == SpawnFailurePolicy::Teardown {
            running.terminate_all();
        }
        reap(running, on_exit)
    }
}

/// Wait for every stage in `running`, in whatever order they finish.
fn reap(running: &mut RunningStages, on_exit: &mut dyn FnMut(&StageReport)) -> Vec<StageReport> {
    let mut reports = Vec::with_capacity(running.len());
    while !running.is_empty() {
        let status = match retry_eintr(wait::wait) {
            Ok(status) => status,
            Err(Errno::ECHILD) => {
                warn!(missing = running.len(), "no children left to wait for");
                break;
            }
            Err(e) => {
                error!(error = %e, "wait failed");
                break;
            }
        };
        let Some((pid, status)) = ExitStatus::from_wait(status) else {
            continue;
        };
        match running.remove(pid) {
            Some(stage) => {
                let report = StageReport { stage, pid, status };
                info!(stage, %pid, code = status.code(), "{}", report);
                on_exit(&report);
                reports.push(report);
            }
            None => warn!(%pid, "reaped a process that is not part of this pipeline"),
        }
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    /// Records what it was asked to launch and fails every launch.
    #[derive(Default)]
    struct Recording {
        seen: Vec<PreparedStage>,
    }

    impl Launcher for Recording {
        fn launch(&mut self, stage: &PreparedStage) -> nix::Result<Pid> {
            self.seen.push(stage.clone());
            Err(Errno::EAGAIN)
        }
    }

    fn pipeline(stages: &[&[&str]]) -> Pipeline {
        Pipeline::new(
            stages
                .iter()
                .map(|words| Command::new(words.iter().copied()).unwrap())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn first_stage_plan_for_three_stages() {
        let mut launcher = Recording::default();
        let err = Orchestrator::default()
            .run_with(&pipeline(&[&["a"], &["b"], &["c"]]), &mut launcher)
            .unwrap_err();

        assert!(matches!(err, PipelineError::ProcessCreation { stage: 0, source: Errno::EAGAIN, .. }));
        assert!(err.reaped().is_empty());

        let plan = &launcher.seen[0];
        assert_eq!(plan.index, 0);
        assert_eq!(plan.argv[0].as_bytes(), b"a");
        assert_eq!(plan.stdin, None);
        // the child gets the full list of channel descriptors to close
        assert_eq!(plan.close.len(), 4);
        assert!(plan.close.contains(&plan.stdout.unwrap()));
    }

    #[test]
    fn single_stage_plan_has_no_channels() {
        let mut launcher = Recording::default();
        Orchestrator::default()
            .run_with(&pipeline(&[&["echo", "hello"]]), &mut launcher)
            .unwrap_err();

        let plan = &launcher.seen[0];
        assert_eq!(plan.stdin, None);
        assert_eq!(plan.stdout, None);
        assert!(plan.close.is_empty());
        assert_eq!(plan.argv.len(), 2);
    }

    #[test]
    fn stage_limit_is_checked_before_launching() {
        let orchestrator = Orchestrator::new(OrchestratorConfig {
            max_stages: Some(1),
            ..OrchestratorConfig::default()
        });
        let mut launcher = Recording::default();
        let err = orchestrator
            .run_with(&pipeline(&[&["a"], &["b"]]), &mut launcher)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Syntax(SyntaxError::TooManyCommands { count: 2, limit: 1 })
        ));
        assert!(launcher.seen.is_empty());
    }

    #[test]
    fn nul_in_programmatic_pipeline_spawns_nothing() {
        let mut launcher = Recording::default();
        let err = Orchestrator::default()
            .run_with(&pipeline(&[&["echo"], &["cat", "x\0y"]]), &mut launcher)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Syntax(SyntaxError::InteriorNul { stage: 1 })
        ));
        assert!(launcher.seen.is_empty());
    }
}
