//! 并发调度器
//!
//! 依赖满足即派发、Semaphore 限制并发度、mpsc 回收完成事件。
//! 单任务失败只影响其（传递）后继，其余分支继续执行；调度结束时保证没有任务停留在 Pending。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::workflow::graph::TaskGraph;
use crate::workflow::types::{
    ArgValue, ExecutionResult, FailureKind, SubTask, SubTaskFailure, TaskId, TaskStatus,
};

/// 调度参数
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 最大并发任务数
    pub max_concurrency: usize,
    /// 单次尝试的超时（秒）
    pub task_timeout_secs: u64,
    /// 总尝试次数上限（含首次）
    pub max_attempts: u32,
    /// 软错误标记：成功 payload 命中任一标记（不区分大小写）则按失败处理
    pub soft_error_markers: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            task_timeout_secs: 60,
            max_attempts: 2,
            soft_error_markers: vec![
                "error:".to_string(),
                "failed:".to_string(),
                "exception:".to_string(),
            ],
        }
    }
}

/// 子任务执行器 trait：按路由分发到工具 / 推理模型 / Brain
#[async_trait]
pub trait SubTaskExecutor: Send + Sync {
    /// 执行单个子任务（参数占位符已由调度器解析为字面量）
    async fn execute(&self, task: &SubTask) -> Result<String, SubTaskFailure>;
}

/// 调度器：持有执行器与参数，每次 run 独占一张任务图
pub struct Scheduler {
    executor: Arc<dyn SubTaskExecutor>,
    config: SchedulerConfig,
}

/// 完成事件：任务 ID、结果、实际尝试次数
type Completion = (TaskId, Result<String, SubTaskFailure>, u32);

impl Scheduler {
    pub fn new(executor: Arc<dyn SubTaskExecutor>, config: SchedulerConfig) -> Self {
        Self { executor, config }
    }

    /// 执行整张任务图直至所有任务达到终态，按分解顺序返回结果
    pub async fn run(
        &self,
        mut graph: TaskGraph,
        cancel: CancellationToken,
    ) -> Vec<ExecutionResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();

        // 成功任务的 payload，用于解析后继任务的占位参数
        let mut payloads: HashMap<TaskId, String> = HashMap::new();
        let mut results: HashMap<TaskId, ExecutionResult> = HashMap::new();
        let mut inflight = 0usize;

        loop {
            for task_id in graph.ready_tasks() {
                let Some(task) = graph.get_mut(&task_id) else {
                    continue;
                };
                task.status = TaskStatus::Ready;

                // Ready 时解析占位参数；引用的结果缺失则不进入 Running
                let resolved = match resolve_args(task, &payloads) {
                    Ok(resolved) => resolved,
                    Err(failure) => {
                        task.status = TaskStatus::Failed;
                        tracing::warn!(task_id = %task_id, error = %failure, "argument resolution failed");
                        results.insert(
                            task_id.clone(),
                            ExecutionResult::failed(task_id.clone(), failure, 0),
                        );
                        for skipped_id in graph.skip_dependents(&task_id) {
                            results.insert(
                                skipped_id.clone(),
                                ExecutionResult::skipped(
                                    skipped_id,
                                    format!("dependency {} failed", task_id),
                                ),
                            );
                        }
                        continue;
                    }
                };

                task.status = TaskStatus::Running;
                task.attempts = 0;
                inflight += 1;
                self.spawn_attempts(resolved, semaphore.clone(), tx.clone(), cancel.clone());
            }

            if inflight == 0 {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("scheduling cancelled, draining in-flight tasks");
                    break;
                }
                completion = rx.recv() => {
                    let Some((task_id, outcome, attempts)) = completion else {
                        break;
                    };
                    inflight -= 1;
                    self.on_completion(&mut graph, &mut payloads, &mut results, task_id, outcome, attempts);
                }
            }
        }

        // 取消或耗尽后不留 Pending：进行中的任务按取消失败收场，未启动的任务标记 Skipped
        for task_id in graph.order().to_vec() {
            let Some(task) = graph.get_mut(&task_id) else {
                continue;
            };
            if task.status.is_terminal() {
                continue;
            }
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Failed;
                results.entry(task_id.clone()).or_insert_with(|| {
                    ExecutionResult::failed(
                        task_id.clone(),
                        SubTaskFailure::new(FailureKind::Cancelled, "request cancelled"),
                        0,
                    )
                });
            } else {
                task.status = TaskStatus::Skipped;
                results
                    .entry(task_id.clone())
                    .or_insert_with(|| ExecutionResult::skipped(task_id.clone(), "request cancelled"));
            }
        }

        graph
            .order()
            .iter()
            .filter_map(|id| results.remove(id))
            .collect()
    }

    /// 派发单个任务：限流许可 -> 带超时与重试的执行循环
    fn spawn_attempts(
        &self,
        task: SubTask,
        semaphore: Arc<Semaphore>,
        tx: mpsc::UnboundedSender<Completion>,
        cancel: CancellationToken,
    ) {
        let executor = Arc::clone(&self.executor);
        let timeout = Duration::from_secs(self.config.task_timeout_secs);
        let max_attempts = self.config.max_attempts.max(1);
        let markers = self.config.soft_error_markers.clone();

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let _ = tx.send((
                        task.id.clone(),
                        Err(SubTaskFailure::new(FailureKind::Cancelled, "scheduler shut down")),
                        0,
                    ));
                    return;
                }
            };

            let mut attempts = 0u32;
            let outcome = loop {
                attempts += 1;

                let attempt = tokio::select! {
                    _ = cancel.cancelled() => {
                        Err(SubTaskFailure::new(FailureKind::Cancelled, "request cancelled"))
                    }
                    result = tokio::time::timeout(timeout, executor.execute(&task)) => {
                        match result {
                            Ok(inner) => inner,
                            Err(_) => Err(SubTaskFailure::new(
                                FailureKind::Timeout,
                                format!("attempt exceeded {}s", timeout.as_secs()),
                            )),
                        }
                    }
                };

                let attempt = reclassify_soft_error(attempt, &markers);

                match attempt {
                    Ok(payload) => break Ok(payload),
                    Err(failure) if failure.kind.is_retryable() && attempts < max_attempts => {
                        tracing::warn!(
                            task_id = %task.id,
                            attempt = attempts,
                            error = %failure,
                            "subtask attempt failed, retrying"
                        );
                        continue;
                    }
                    Err(failure) => break Err(failure),
                }
            };

            let _ = tx.send((task.id, outcome, attempts));
        });
    }

    /// 回收完成事件：更新状态、记录结果、失败时跳过后继
    fn on_completion(
        &self,
        graph: &mut TaskGraph,
        payloads: &mut HashMap<TaskId, String>,
        results: &mut HashMap<TaskId, ExecutionResult>,
        task_id: TaskId,
        outcome: Result<String, SubTaskFailure>,
        attempts: u32,
    ) {
        if let Some(task) = graph.get_mut(&task_id) {
            task.attempts = attempts;
            task.status = if outcome.is_ok() {
                TaskStatus::Succeeded
            } else {
                TaskStatus::Failed
            };
        }

        match outcome {
            Ok(payload) => {
                tracing::debug!(task_id = %task_id, attempts, "subtask succeeded");
                payloads.insert(task_id.clone(), payload.clone());
                results.insert(
                    task_id.clone(),
                    ExecutionResult::succeeded(task_id, payload, attempts),
                );
            }
            Err(failure) => {
                tracing::warn!(task_id = %task_id, attempts, error = %failure, "subtask failed terminally");
                results.insert(
                    task_id.clone(),
                    ExecutionResult::failed(task_id.clone(), failure, attempts),
                );
                for skipped_id in graph.skip_dependents(&task_id) {
                    tracing::debug!(task_id = %skipped_id, cause = %task_id, "subtask skipped");
                    results.insert(
                        skipped_id.clone(),
                        ExecutionResult::skipped(
                            skipped_id,
                            format!("dependency {} failed", task_id),
                        ),
                    );
                }
            }
        }
    }
}

/// 将占位参数解析为字面量，返回可直接执行的任务副本
fn resolve_args(
    task: &SubTask,
    payloads: &HashMap<TaskId, String>,
) -> Result<SubTask, SubTaskFailure> {
    let mut resolved = task.clone();
    for (name, value) in &task.args {
        if let ArgValue::FromTask(source_id) = value {
            let payload = payloads.get(source_id).ok_or_else(|| {
                SubTaskFailure::new(
                    FailureKind::InvalidArgument,
                    format!("arg '{}' references task {} with no result", name, source_id),
                )
            })?;
            resolved
                .args
                .insert(name.clone(), ArgValue::Literal(payload.clone()));
        }
    }
    Ok(resolved)
}

/// 软错误识别：成功 payload 命中标记时降级为失败（不区分大小写）
fn reclassify_soft_error(
    outcome: Result<String, SubTaskFailure>,
    markers: &[String],
) -> Result<String, SubTaskFailure> {
    match outcome {
        Ok(payload) => {
            let lower = payload.to_lowercase();
            if let Some(marker) = markers.iter().find(|m| lower.contains(&m.to_lowercase())) {
                Err(SubTaskFailure::new(
                    FailureKind::SoftError,
                    format!("payload matched soft-error marker '{}': {}", marker, payload),
                ))
            } else {
                Ok(payload)
            }
        }
        Err(failure) => Err(failure),
    }
}
