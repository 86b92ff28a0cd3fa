// Decomposes an operation into its ordered tasks.

use porter_common::model::{Receipt, Task, TaskReason, TaskType, Upload};

/// Task that puts `upload` into the install folder, given what is there now.
pub fn install_task_type(upload: &Upload, receipt: Option<&Receipt>) -> TaskType {
    match receipt {
        None => TaskType::Install,
        Some(r) if r.matches(upload.id, upload.build_id) => TaskType::Heal,
        Some(_) => TaskType::Update,
    }
}

/// `[download?, install|update|heal]`. The download is skipped when the
/// artifact is already available locally.
pub fn plan_install(upload: &Upload, receipt: Option<&Receipt>, staged: bool) -> Vec<Task> {
    let size = upload.size.unwrap_or(0);
    let mut tasks = Vec::with_capacity(2);
    if upload.local_path.is_none() && !staged {
        tasks.push(Task::new(TaskType::Download, TaskReason::Install, size));
    }
    tasks.push(Task::new(
        install_task_type(upload, receipt),
        TaskReason::Install,
        size,
    ));
    tasks
}

pub fn plan_uninstall() -> Vec<Task> {
    vec![Task::new(TaskType::Uninstall, TaskReason::Uninstall, 0)]
}
