//! In-memory task list capabilities.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Arguments, Capability, CapabilityOutcome, ParameterKind, ParameterSpec};

const PRIORITIES: [&str; 3] = ["low", "medium", "high"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    pub priority: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Shared, non-persistent task storage backing both task capabilities.
#[derive(Clone, Default)]
pub struct TaskList {
    tasks: Arc<RwLock<Vec<Task>>>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<Task> {
        self.tasks.read().await.clone()
    }
}

pub struct CreateTask {
    tasks: TaskList,
}

impl CreateTask {
    pub fn new(tasks: TaskList) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl Capability for CreateTask {
    fn name(&self) -> &str {
        "create_task"
    }

    fn description(&self) -> &str {
        "Add a task to the user's task list. Use when the user asks to remember, plan or track something to do."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required("title", ParameterKind::String, "Short task title"),
            ParameterSpec::optional(
                "due_date",
                ParameterKind::String,
                "Due date, e.g. 2025-03-01",
                None,
            ),
            ParameterSpec::optional(
                "priority",
                ParameterKind::String,
                "low, medium or high",
                Some(json!("medium")),
            ),
        ]
    }

    async fn execute(&self, args: Arguments) -> anyhow::Result<CapabilityOutcome> {
        let title = args
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Task title cannot be empty"))?;
        let priority = args
            .get("priority")
            .and_then(Value::as_str)
            .unwrap_or("medium")
            .to_lowercase();
        if !PRIORITIES.contains(&priority.as_str()) {
            return Err(anyhow::anyhow!(
                "priority must be one of {}",
                PRIORITIES.join(", ")
            ));
        }

        let task = Task {
            id: Uuid::new_v4(),
            title: title.to_string(),
            due_date: args
                .get("due_date")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            priority,
            status: "pending".to_string(),
            created_at: Utc::now(),
        };
        self.tasks.tasks.write().await.push(task.clone());
        tracing::info!("Created task {}: {}", task.id, task.title);

        Ok(CapabilityOutcome::success(serde_json::to_value(&task)?))
    }
}

pub struct ListTasks {
    tasks: TaskList,
}

impl ListTasks {
    pub fn new(tasks: TaskList) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl Capability for ListTasks {
    fn name(&self) -> &str {
        "list_tasks"
    }

    fn description(&self) -> &str {
        "List tasks on the user's task list, optionally filtered by status (pending or done)."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::optional(
            "status",
            ParameterKind::String,
            "Only tasks with this status",
            None,
        )]
    }

    async fn execute(&self, args: Arguments) -> anyhow::Result<CapabilityOutcome> {
        let status = args.get("status").and_then(Value::as_str);
        let tasks: Vec<Value> = self
            .tasks
            .snapshot()
            .await
            .into_iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .map(|t| {
                json!({
                    "title": t.title,
                    "snippet": format!(
                        "priority {}, due {}, {}",
                        t.priority,
                        t.due_date.as_deref().unwrap_or("unspecified"),
                        t.status
                    ),
                    "id": t.id,
                })
            })
            .collect();

        let count = tasks.len();
        Ok(CapabilityOutcome::success(Value::Array(tasks)).with_metadata("count", json!(count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn created_tasks_are_listed() {
        let tasks = TaskList::new();
        let create = CreateTask::new(tasks.clone());
        let list = ListTasks::new(tasks.clone());

        let created = create
            .execute(args(json!({"title": "Write report", "priority": "High"})))
            .await
            .unwrap();
        assert!(created.success);
        assert_eq!(created.data["priority"], "high");
        assert_eq!(created.data["status"], "pending");

        let listed = list.execute(args(json!({"status": "pending"}))).await.unwrap();
        assert_eq!(listed.metadata["count"], 1);
        assert_eq!(listed.data[0]["title"], "Write report");

        let done = list.execute(args(json!({"status": "done"}))).await.unwrap();
        assert_eq!(done.data, json!([]));
    }

    #[tokio::test]
    async fn invalid_priority_is_an_error() {
        let create = CreateTask::new(TaskList::new());
        assert!(create
            .execute(args(json!({"title": "x", "priority": "urgent"})))
            .await
            .is_err());
    }
}
