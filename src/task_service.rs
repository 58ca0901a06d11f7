//! Task tracking: creation, status-transition validation, polymorphic
//! user/agent assignment, and dependency management.
//!
//! Assignment replaces the source's single `assigned_to`/`assigned_to_type`
//! pair with two explicit nullable FKs (`user_assigned_to`, `agent_assigned_to`)
//! plus the `AssigneeType` discriminator on the wire, per DESIGN.md.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use crate::auth::AuthService;
use crate::error::{BrokerError, BrokerResult};
use crate::models::{AssignTask, AssigneeType, CreateTask, Task, TaskPriority, TaskStatus, UpdateTask};
use crate::store::sqlite::SqliteStore;

/// Status transitions a task may undergo, mirroring the source's
/// `VALID_STATUS_TRANSITIONS` table.
fn valid_transitions(from: TaskStatus) -> &'static [TaskStatus] {
    use TaskStatus::*;
    match from {
        Pending => &[InProgress, Blocked, Cancelled],
        InProgress => &[Review, Blocked, Pending, Cancelled, Completed],
        Review => &[InProgress, Completed, Pending, Cancelled],
        Blocked => &[Pending, InProgress, Cancelled],
        Completed => &[InProgress],
        Cancelled => &[Pending],
    }
}

pub trait TaskStore: Send + Sync {
    fn insert_task(&self, task: Task) -> BrokerResult<()>;
    fn get_task(&self, project_id: &str, id: Uuid) -> BrokerResult<Option<Task>>;
    fn list_tasks(&self, project_id: &str) -> BrokerResult<Vec<Task>>;
    fn update_task(&self, project_id: &str, id: Uuid, f: Box<dyn FnOnce(&mut Task) -> BrokerResult<()> + '_>) -> BrokerResult<Task>;
    fn delete_task(&self, project_id: &str, id: Uuid) -> BrokerResult<()>;
}

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<Uuid, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn insert_task(&self, task: Task) -> BrokerResult<()> {
        self.tasks.lock().unwrap().insert(task.id, task);
        Ok(())
    }

    fn get_task(&self, project_id: &str, id: Uuid) -> BrokerResult<Option<Task>> {
        Ok(self.tasks.lock().unwrap().get(&id).filter(|t| t.project_id == project_id).cloned())
    }

    fn list_tasks(&self, project_id: &str) -> BrokerResult<Vec<Task>> {
        Ok(self.tasks.lock().unwrap().values().filter(|t| t.project_id == project_id).cloned().collect())
    }

    fn update_task(&self, project_id: &str, id: Uuid, f: Box<dyn FnOnce(&mut Task) -> BrokerResult<()> + '_>) -> BrokerResult<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&id)
            .filter(|t| t.project_id == project_id)
            .ok_or_else(|| BrokerError::NotFound(format!("task {id}")))?;
        f(task)?;
        Ok(task.clone())
    }

    fn delete_task(&self, project_id: &str, id: Uuid) -> BrokerResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.get(&id).filter(|t| t.project_id == project_id).is_none() {
            return Err(BrokerError::NotFound(format!("task {id}")));
        }
        tasks.remove(&id);
        Ok(())
    }
}

pub struct SqliteTaskStore {
    store: Arc<SqliteStore>,
}

impl SqliteTaskStore {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        SqliteTaskStore { store }
    }
}

impl TaskStore for SqliteTaskStore {
    fn insert_task(&self, task: Task) -> BrokerResult<()> {
        let conn = self.store.conn.lock().unwrap();
        let data = serde_json::to_string(&task).map_err(|e| BrokerError::Internal(e.to_string()))?;
        conn.execute(
            "INSERT INTO tasks (id, project_id, data) VALUES (?1, ?2, ?3)",
            params![task.id.to_string(), task.project_id, data],
        )?;
        Ok(())
    }

    fn get_task(&self, project_id: &str, id: Uuid) -> BrokerResult<Option<Task>> {
        let conn = self.store.conn.lock().unwrap();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM tasks WHERE id=?1 AND project_id=?2",
                params![id.to_string(), project_id],
                |r| r.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).map_err(|e| BrokerError::Internal(e.to_string()))).transpose()
    }

    fn list_tasks(&self, project_id: &str) -> BrokerResult<Vec<Task>> {
        let conn = self.store.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM tasks WHERE project_id=?1")?;
        let rows = stmt.query_map(params![project_id], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?).map_err(|e| BrokerError::Internal(e.to_string()))?);
        }
        Ok(out)
    }

    fn update_task(&self, project_id: &str, id: Uuid, f: Box<dyn FnOnce(&mut Task) -> BrokerResult<()> + '_>) -> BrokerResult<Task> {
        let conn = self.store.conn.lock().unwrap();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM tasks WHERE id=?1 AND project_id=?2",
                params![id.to_string(), project_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(data) = data else {
            return Err(BrokerError::NotFound(format!("task {id}")));
        };
        let mut task: Task = serde_json::from_str(&data).map_err(|e| BrokerError::Internal(e.to_string()))?;
        f(&mut task)?;
        let updated = serde_json::to_string(&task).map_err(|e| BrokerError::Internal(e.to_string()))?;
        conn.execute("UPDATE tasks SET data=?3 WHERE id=?1 AND project_id=?2", params![id.to_string(), project_id, updated])?;
        Ok(task)
    }

    fn delete_task(&self, project_id: &str, id: Uuid) -> BrokerResult<()> {
        let conn = self.store.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM tasks WHERE id=?1 AND project_id=?2", params![id.to_string(), project_id])?;
        if changed == 0 {
            return Err(BrokerError::NotFound(format!("task {id}")));
        }
        Ok(())
    }
}

pub struct TaskService {
    store: Box<dyn TaskStore>,
    auth: Arc<AuthService>,
}

impl TaskService {
    pub fn new(store: Box<dyn TaskStore>, auth: Arc<AuthService>) -> Self {
        TaskService { store, auth }
    }

    fn check_assignee(&self, assignee_id: Uuid, assignee_type: AssigneeType) -> BrokerResult<()> {
        if assignee_type == AssigneeType::Agent {
            let agent = self
                .auth
                .get_agent(assignee_id)
                .ok_or_else(|| BrokerError::Validation(format!("no such agent: {assignee_id}")))?;
            if !agent.is_active {
                return Err(BrokerError::Validation(format!("agent {assignee_id} is not active")));
            }
        }
        Ok(())
    }

    pub fn create_task(&self, req: CreateTask) -> BrokerResult<Task> {
        for dep_id in &req.dependencies {
            if self.store.get_task(&req.project_id, *dep_id)?.is_none() {
                return Err(BrokerError::Validation(format!("dependency task not found: {dep_id}")));
            }
        }
        if let Some(agent_id) = req.agent_assigned_to {
            self.check_assignee(agent_id, AssigneeType::Agent)?;
        }
        let task = Task {
            id: Uuid::new_v4(),
            project_id: req.project_id,
            title: req.title,
            description: req.description,
            status: TaskStatus::Pending,
            priority: req.priority.unwrap_or(TaskPriority::Medium),
            user_assigned_to: req.user_assigned_to,
            agent_assigned_to: req.agent_assigned_to,
            created_by_id: req.created_by_id,
            dependencies: req.dependencies,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            due_date: req.due_date,
            result: None,
        };
        self.store.insert_task(task.clone())?;
        Ok(task)
    }

    pub fn get_task(&self, project_id: &str, id: Uuid) -> BrokerResult<Task> {
        self.store.get_task(project_id, id)?.ok_or_else(|| BrokerError::NotFound(format!("task {id}")))
    }

    pub fn list_tasks(
        &self,
        project_id: &str,
        status: Option<TaskStatus>,
        priority: Option<TaskPriority>,
    ) -> BrokerResult<Vec<Task>> {
        let mut tasks = self.store.list_tasks(project_id)?;
        if let Some(status) = status {
            tasks.retain(|t| t.status == status);
        }
        if let Some(priority) = priority {
            tasks.retain(|t| t.priority == priority);
        }
        Ok(tasks)
    }

    pub fn update_task(&self, project_id: &str, id: Uuid, req: UpdateTask) -> BrokerResult<Task> {
        self.store.update_task(
            project_id,
            id,
            Box::new(move |task: &mut Task| {
                if let Some(title) = req.title {
                    task.title = title;
                }
                if req.description.is_some() {
                    task.description = req.description;
                }
                if let Some(priority) = req.priority {
                    task.priority = priority;
                }
                if req.due_date.is_some() {
                    task.due_date = req.due_date;
                }
                if req.result.is_some() {
                    task.result = req.result;
                }
                Ok(())
            }),
        )
    }

    pub fn delete_task(&self, project_id: &str, id: Uuid) -> BrokerResult<()> {
        self.store.delete_task(project_id, id)
    }

    /// Assigns a task to exactly one of a user or an agent; assigning one
    /// clears the other rather than leaving a stale polymorphic reference.
    pub fn assign_task(&self, project_id: &str, id: Uuid, req: AssignTask) -> BrokerResult<Task> {
        self.check_assignee(req.assignee_id, req.assignee_type)?;
        self.store.update_task(
            project_id,
            id,
            Box::new(move |task: &mut Task| {
                match req.assignee_type {
                    AssigneeType::Agent => {
                        task.agent_assigned_to = Some(req.assignee_id);
                        task.user_assigned_to = None;
                    }
                    AssigneeType::User => {
                        task.user_assigned_to = Some(req.assignee_id);
                        task.agent_assigned_to = None;
                    }
                }
                Ok(())
            }),
        )
    }

    pub fn unassign_task(&self, project_id: &str, id: Uuid) -> BrokerResult<Task> {
        self.store.update_task(
            project_id,
            id,
            Box::new(|task: &mut Task| {
                task.user_assigned_to = None;
                task.agent_assigned_to = None;
                Ok(())
            }),
        )
    }

    /// Validates the transition against `valid_transitions`, then
    /// auto-stamps `started_at`/`completed_at` the way the source does.
    pub fn update_status(&self, project_id: &str, id: Uuid, new_status: TaskStatus) -> BrokerResult<Task> {
        self.store.update_task(
            project_id,
            id,
            Box::new(move |task: &mut Task| {
                let allowed = valid_transitions(task.status);
                if !allowed.contains(&new_status) {
                    return Err(BrokerError::InvalidState(format!(
                        "cannot transition task from {:?} to {:?}",
                        task.status, new_status
                    )));
                }
                let now = Utc::now();
                match new_status {
                    TaskStatus::InProgress if task.status == TaskStatus::Pending => {
                        task.started_at = Some(now);
                    }
                    TaskStatus::Review | TaskStatus::Completed => {
                        if task.started_at.is_none() {
                            task.started_at = Some(now);
                        }
                        task.completed_at = Some(now);
                    }
                    TaskStatus::Pending => {
                        task.started_at = None;
                        task.completed_at = None;
                    }
                    _ => {}
                }
                task.status = new_status;
                Ok(())
            }),
        )
    }

    pub fn start_task(&self, project_id: &str, id: Uuid) -> BrokerResult<Task> {
        self.update_status(project_id, id, TaskStatus::InProgress)
    }

    pub fn complete_task(&self, project_id: &str, id: Uuid) -> BrokerResult<Task> {
        self.update_status(project_id, id, TaskStatus::Completed)
    }

    pub fn cancel_task(&self, project_id: &str, id: Uuid) -> BrokerResult<Task> {
        self.update_status(project_id, id, TaskStatus::Cancelled)
    }

    pub fn block_task(&self, project_id: &str, id: Uuid) -> BrokerResult<Task> {
        self.update_status(project_id, id, TaskStatus::Blocked)
    }

    /// Rejects a dependency already present and the direct two-node cycle
    /// (`dependency_id` already depending on `task_id`); deeper cycles would
    /// need a full graph walk, which the source also leaves undone.
    pub fn add_dependency(&self, project_id: &str, id: Uuid, dependency_id: Uuid) -> BrokerResult<Task> {
        let dependency = self
            .store
            .get_task(project_id, dependency_id)?
            .ok_or_else(|| BrokerError::NotFound(format!("task {dependency_id}")))?;
        self.store.update_task(
            project_id,
            id,
            Box::new(move |task: &mut Task| {
                if task.dependencies.contains(&dependency_id) {
                    return Err(BrokerError::Validation(format!("task already depends on {dependency_id}")));
                }
                if dependency.dependencies.contains(&task.id) {
                    return Err(BrokerError::Validation("adding this dependency would create a cycle".to_string()));
                }
                task.dependencies.push(dependency_id);
                Ok(())
            }),
        )
    }

    pub fn remove_dependency(&self, project_id: &str, id: Uuid, dependency_id: Uuid) -> BrokerResult<Task> {
        self.store.update_task(
            project_id,
            id,
            Box::new(move |task: &mut Task| {
                if !task.dependencies.contains(&dependency_id) {
                    return Err(BrokerError::Validation(format!("task does not depend on {dependency_id}")));
                }
                task.dependencies.retain(|d| *d != dependency_id);
                Ok(())
            }),
        )
    }
}
