//! Task-queue on-disk format: a single JSON document of task metadata,
//! written atomically on every mutation.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::task::{QueueTask, TaskStatus};

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedDocument {
    pub tasks: HashMap<String, QueueTask>,
}

/// Write `tasks` to `path` atomically: write to a sibling temp file, flush,
/// then rename over the destination. Creates the parent directory (mode
/// 0755) if absent; the file itself is left at mode 0644.
pub async fn save(path: &Path, tasks: &HashMap<String, QueueTask>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755)).await?;
            }
        }
    }

    let doc = PersistedDocument { tasks: tasks.clone() };
    let json = serde_json::to_vec_pretty(&doc)?;

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, &json).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o644)).await?;
    }
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Load `path`, coercing any `Running`/`Retrying` task back to `Pending`
/// (per the restart contract: in-flight work did not survive the process).
pub async fn load(path: &Path) -> Result<HashMap<String, QueueTask>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let bytes = tokio::fs::read(path).await?;
    let mut doc: PersistedDocument = serde_json::from_slice(&bytes)?;
    for task in doc.tasks.values_mut() {
        if matches!(task.status, TaskStatus::Running | TaskStatus::Retrying) {
            task.status = TaskStatus::Pending;
        }
    }
    Ok(doc.tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::task::TaskPriority;

    #[tokio::test]
    async fn round_trips_and_coerces_in_flight_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.json");

        let mut tasks = HashMap::new();
        let mut t1 = QueueTask::new("t1", TaskPriority::High, 3);
        t1.status = TaskStatus::Running;
        tasks.insert("t1".to_string(), t1);
        let mut t2 = QueueTask::new("t2", TaskPriority::Low, 3);
        t2.status = TaskStatus::Retrying;
        tasks.insert("t2".to_string(), t2);

        save(&path, &tasks).await.unwrap();
        assert!(path.exists());

        let loaded = load(&path).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["t1"].status, TaskStatus::Pending);
        assert_eq!(loaded["t2"].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let loaded = load(&path).await.unwrap();
        assert!(loaded.is_empty());
    }
}
