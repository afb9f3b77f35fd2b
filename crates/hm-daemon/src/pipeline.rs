//! Per-task execution pipeline and the review approval path.
//!
//! One pipeline run: call the backend, parse the structured output,
//! apply side effects behind the risk gate, settle the agent's counters,
//! score the output, persist memory, spawn subtasks, and publish the
//! lifecycle events in order (`agent:working` → file/exec events →
//! `rl:scored` → `agent:completed` / `agent:error`).

use chrono::Utc;
use tracing::{debug, error, info, warn};

use hm_agents::NewTask;
use hm_backend::prompt::{compose_system_prompt, HistoryLine, PerformanceHint, MEMORY_CONTEXT_LEN};
use hm_backend::{BackendError, Completion, ErrorKind};
use hm_bus::BusEvent;
use hm_core::config::AgentSpec;
use hm_core::parser::parse_output;
use hm_core::types::{
    truncate_chars, CreatedBy, RiskLevel, Task, TaskHistoryEntry, TaskOutcome, TaskPriority,
    TaskStatus, EXPLANATION_CAP, MAX_TASK_DEPTH,
};
use hm_scoring::{failure_score, score_completion, ScoreInput};

use crate::daemon::{DaemonError, Orchestrator};

impl Orchestrator {
    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run one dispatched task to settlement. Every outcome (success,
    /// review, backend failure, write failure) lands in the task result
    /// and the agent's counters; nothing propagates out of the worker.
    pub async fn execute_task(&self, task_id: &str, agent_id: &str) {
        let Some(task) = self.manager.get(task_id) else {
            warn!(task_id, "task vanished before execution");
            return;
        };
        let Some(agent) = self.registry.get(agent_id) else {
            warn!(agent_id, "agent vanished before execution");
            return;
        };
        let Some(backend) = self.registry.backend(agent_id) else {
            warn!(agent_id, "agent has no backend");
            return;
        };

        self.bus.publish(BusEvent::AgentWorking {
            agent_id: agent_id.to_string(),
            task_id: task.id.clone(),
        });

        let (system_prompt, user_prompt) = self.build_prompts(&task, &agent.spec, agent_id);

        match backend.execute(&system_prompt, &user_prompt).await {
            Ok(completion) => {
                self.settle_success(&task, agent_id, &agent.spec, completion)
                    .await;
            }
            Err(err) => {
                self.settle_backend_failure(&task, agent_id, &agent.spec, &err);
            }
        }
    }

    /// Compose the adaptive system prompt plus the task prompt.
    fn build_prompts(&self, task: &Task, spec: &AgentSpec, agent_id: &str) -> (String, String) {
        let perf = self.memory.performance();
        let hint = PerformanceHint {
            overall: perf.overall_score(agent_id),
            recent_failures: perf.recent_failures(agent_id),
        };
        let history: Vec<HistoryLine> = self
            .memory
            .recent_history(MEMORY_CONTEXT_LEN)
            .into_iter()
            .map(|(id, entry)| {
                HistoryLine::new(
                    id,
                    entry.agent_name,
                    entry.title,
                    &entry.explanation,
                    entry.file_paths,
                )
            })
            .collect();

        let system_prompt = compose_system_prompt(
            &spec.display_name,
            agent_id,
            &spec.role,
            &task.description,
            &self.skills,
            hint,
            &history,
        );
        let user_prompt = format!("Task {}: {}\n\n{}", task.id, task.title, task.description);
        (system_prompt, user_prompt)
    }

    async fn settle_success(
        &self,
        task: &Task,
        agent_id: &str,
        spec: &AgentSpec,
        completion: Completion,
    ) {
        let parsed = parse_output(&completion.text);
        let raw_has_file_marker = completion.text.contains("FILE");

        let mut outcome = TaskOutcome {
            success: true,
            explanation: parsed.explanation.clone(),
            raw_output: completion.text.clone(),
            tokens_used: completion.tokens,
            agent_name: spec.display_name.clone(),
            model: completion.model.clone(),
            files: parsed.files.clone(),
            commands: parsed.commands.clone(),
            exec_results: Vec::new(),
            perf_score: 0,
            task_types: task.tags.clone(),
        };

        let mut exec_ran = false;
        let mut final_status = TaskStatus::Completed;

        if !parsed.files.is_empty() && task.risk == RiskLevel::Low {
            match self.executor.write_files(&parsed.files) {
                Ok(report) => {
                    self.publish_write_events(&task.id, agent_id, &report);
                    if !parsed.commands.is_empty() {
                        let results = self.executor.run_commands(&parsed.commands).await;
                        for result in &results {
                            self.bus.publish(BusEvent::CommandDone {
                                task_id: task.id.clone(),
                                agent_id: agent_id.to_string(),
                                command: result.command.clone(),
                                success: result.success,
                            });
                        }
                        outcome.exec_results = results;
                        exec_ran = true;
                    }
                }
                Err(err) => {
                    error!(task_id = %task.id, error = %err, "file write failed");
                    self.settle_failure_with(
                        task,
                        agent_id,
                        spec,
                        format!("file write failed: {}", err),
                        false,
                    );
                    return;
                }
            }
        } else if !parsed.files.is_empty() {
            // high risk: intents parked on the result until approval
            final_status = TaskStatus::Review;
        }

        let score = score_completion(&ScoreInput {
            files: parsed.files.len(),
            raw_has_file_marker,
            commands: parsed.commands.len(),
            exec_results: if exec_ran {
                Some(&outcome.exec_results)
            } else {
                None
            },
            tokens: completion.tokens,
            failed: false,
        });
        outcome.perf_score = score;

        if let Err(err) = self.manager.attach_result(&task.id, outcome) {
            warn!(task_id = %task.id, error = %err, "could not attach result");
        }
        if let Err(err) = self.manager.transition(&task.id, final_status) {
            warn!(task_id = %task.id, error = %err, "could not settle task status");
        }
        // the agent is freed only after the task left `active`
        let _ = self.registry.credit_completion(agent_id, completion.tokens);

        self.memory
            .record_performance(agent_id, &task.tags, score, &task.id, Utc::now());
        let entry = TaskHistoryEntry {
            title: task.title.clone(),
            agent_id: agent_id.to_string(),
            agent_name: spec.display_name.clone(),
            model: completion.model,
            explanation: truncate_chars(&parsed.explanation, EXPLANATION_CAP),
            file_paths: parsed.files.iter().map(|f| f.path.clone()).collect(),
            tokens: completion.tokens,
            success: true,
            timestamp: Utc::now(),
        };
        if let Err(err) = self.memory.record_task(&task.id, entry) {
            warn!(error = %err, "audit append failed");
        }
        if let Err(err) = self.memory.save() {
            warn!(error = %err, "memory save failed");
        }

        self.bus.publish(BusEvent::Scored {
            task_id: task.id.clone(),
            agent_id: agent_id.to_string(),
            score,
            tags: task.tags.clone(),
        });

        self.spawn_subtasks(task, agent_id, &parsed.subtasks);

        match final_status {
            TaskStatus::Review => {
                info!(task_id = %task.id, "task parked for review");
                self.bus.publish(BusEvent::TaskInReview {
                    task_id: task.id.clone(),
                    agent_id: agent_id.to_string(),
                });
            }
            _ => {
                info!(task_id = %task.id, score, "task completed");
                self.bus.publish(BusEvent::AgentCompleted {
                    agent_id: agent_id.to_string(),
                    task_id: task.id.clone(),
                    score,
                });
            }
        }
    }

    fn settle_backend_failure(
        &self,
        task: &Task,
        agent_id: &str,
        spec: &AgentSpec,
        err: &BackendError,
    ) {
        let kind = err.kind();
        match kind {
            ErrorKind::RateLimited => {
                warn!(task_id = %task.id, agent = %agent_id, "rate limited, cooling down");
                let _ = self.registry.set_cooldown(agent_id, self.cooldown);
            }
            _ => {
                warn!(task_id = %task.id, agent = %agent_id, error = %err, "backend call failed");
            }
        }
        let transport_related = matches!(kind, ErrorKind::RateLimited | ErrorKind::Transport);
        self.settle_failure_with(task, agent_id, spec, err.to_string(), transport_related);
        // non-rate-limit failures return the agent to idle (or error)
        if kind != ErrorKind::RateLimited {
            let _ = self.registry.record_failure(agent_id);
        }
    }

    /// Shared failure settlement: failed status, failure score, memory,
    /// events. The caller handles the agent's status transition.
    fn settle_failure_with(
        &self,
        task: &Task,
        agent_id: &str,
        spec: &AgentSpec,
        message: String,
        transport_related: bool,
    ) {
        let score = failure_score(transport_related);
        let outcome = TaskOutcome {
            success: false,
            explanation: message.clone(),
            raw_output: String::new(),
            tokens_used: 0,
            agent_name: spec.display_name.clone(),
            model: spec.model.clone(),
            files: Vec::new(),
            commands: Vec::new(),
            exec_results: Vec::new(),
            perf_score: score,
            task_types: task.tags.clone(),
        };
        let _ = self.manager.attach_result(&task.id, outcome);
        let _ = self.manager.transition(&task.id, TaskStatus::Failed);

        self.memory
            .record_performance(agent_id, &task.tags, score, &task.id, Utc::now());
        let entry = TaskHistoryEntry {
            title: task.title.clone(),
            agent_id: agent_id.to_string(),
            agent_name: spec.display_name.clone(),
            model: spec.model.clone(),
            explanation: truncate_chars(&message, EXPLANATION_CAP),
            file_paths: Vec::new(),
            tokens: 0,
            success: false,
            timestamp: Utc::now(),
        };
        if let Err(err) = self.memory.record_task(&task.id, entry) {
            warn!(error = %err, "audit append failed");
        }
        if let Err(err) = self.memory.save() {
            warn!(error = %err, "memory save failed");
        }

        self.bus.publish(BusEvent::Scored {
            task_id: task.id.clone(),
            agent_id: agent_id.to_string(),
            score,
            tags: task.tags.clone(),
        });
        self.bus.publish(BusEvent::AgentError {
            agent_id: agent_id.to_string(),
            message,
        });
    }

    /// Create child tasks for parsed SUBTASK blocks, bounded by the depth
    /// cap. Children get the same auto-detection as user tasks.
    fn spawn_subtasks(
        &self,
        parent: &Task,
        agent_id: &str,
        subtasks: &[hm_core::types::SubtaskIntent],
    ) {
        if subtasks.is_empty() {
            return;
        }
        if parent.depth >= MAX_TASK_DEPTH {
            debug!(task_id = %parent.id, depth = parent.depth, "depth cap reached, subtasks dropped");
            return;
        }
        for sub in subtasks {
            let child = self.manager.create_task(NewTask {
                title: sub.title.clone(),
                description: sub.description.clone(),
                priority: TaskPriority::Medium,
                preferred_agent: sub.agent.clone(),
                created_by: CreatedBy::Agent(agent_id.to_string()),
                parent_task_id: Some(parent.id.clone()),
                depth: parent.depth + 1,
                file_paths: Vec::new(),
            });
            info!(parent = %parent.id, child = %child.id, "subtask spawned");
        }
    }

    fn publish_write_events(&self, task_id: &str, agent_id: &str, report: &hm_exec::WriteReport) {
        if !report.written.is_empty() {
            self.bus.publish(BusEvent::FilesWritten {
                task_id: task_id.to_string(),
                agent_id: agent_id.to_string(),
                paths: report.written.clone(),
            });
        }
        for path in &report.rejected {
            self.bus.publish(BusEvent::FileRejected {
                task_id: task_id.to_string(),
                path: path.clone(),
            });
        }
    }

    // -----------------------------------------------------------------------
    // Review resolution
    // -----------------------------------------------------------------------

    /// Apply a reviewed task's parked side effects and complete it.
    pub async fn approve_task(&self, task_id: &str) -> Result<(), DaemonError> {
        let task = self
            .manager
            .get(task_id)
            .ok_or_else(|| hm_agents::TaskError::NotFound(task_id.to_string()))?;
        if task.status != TaskStatus::Review {
            return Err(DaemonError::NotInReview(task_id.to_string()));
        }
        let agent_id = task
            .assigned_agent_id
            .clone()
            .unwrap_or_else(|| "system".to_string());

        if let Some(mut result) = task.result.clone() {
            let report = self.executor.write_files(&result.files)?;
            self.publish_write_events(task_id, &agent_id, &report);

            if !result.commands.is_empty() {
                let outcomes = self.executor.run_commands(&result.commands).await;
                for outcome in &outcomes {
                    self.bus.publish(BusEvent::CommandDone {
                        task_id: task_id.to_string(),
                        agent_id: agent_id.clone(),
                        command: outcome.command.clone(),
                        success: outcome.success,
                    });
                }
                result.exec_results = outcomes;
            }
            self.manager.attach_result(task_id, result)?;
        }

        self.manager.transition(task_id, TaskStatus::Completed)?;
        info!(task_id, "review approved, side effects applied");
        self.bus.publish(BusEvent::TaskApproved {
            task_id: task_id.to_string(),
        });
        if let Err(err) = self.memory.save() {
            warn!(error = %err, "memory save failed");
        }
        Ok(())
    }

    /// Discard a reviewed task: no side effect ever happens.
    pub fn reject_task(&self, task_id: &str) -> Result<(), DaemonError> {
        self.manager.transition(task_id, TaskStatus::Cancelled)?;
        info!(task_id, "review rejected, side effects discarded");
        self.bus.publish(BusEvent::TaskRejected {
            task_id: task_id.to_string(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
