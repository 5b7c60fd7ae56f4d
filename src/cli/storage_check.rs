use anyhow::Result;

use crate::core::config::EnvConfig;
use crate::core::storage::{ObjectEntry, ObjectStore};
use crate::core::terminal::{ReportTable, print_status};

fn render_listing(title: &str, entries: &[ObjectEntry]) {
    let mut table = ReportTable::new(title, &["Name", "Created", "Size"]);
    if entries.is_empty() {
        table.row(&["(none)", "-", "-"]);
    } else {
        for entry in entries {
            let created = entry
                .created_at
                .as_deref()
                .unwrap_or("")
                .chars()
                .take(19)
                .collect::<String>()
                .replace('T', " ");
            let size = entry
                .size()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            table.row(&[&entry.name, &created, &size]);
        }
    }
    table.print();
}

/// Inspect bucket visibility for seeds, auth state, and a run's artifacts.
pub async fn run_storage_check(cfg: &EnvConfig, run_id: Option<&str>) -> Result<()> {
    let (url, key) = cfg.require_backend()?;
    let store = ObjectStore::new(&url, &key);

    print_status("Project", &url);
    print_status("Key prefix", &format!("{:.12}...", key));

    let seeds = store.list("artifacts", "seeds/", 10).await?;
    let auth = store.list("auth", "", 10).await?;
    render_listing("Artifacts / seeds", &seeds);
    render_listing("Auth bucket", &auth);

    if let Some(run_id) = run_id {
        let modern = store
            .list("artifacts", &format!("runs/{}/", run_id), 20)
            .await?;
        let legacy = store.list("artifacts", &format!("{}/", run_id), 20).await?;
        render_listing(&format!("Artifacts / runs/{}", run_id), &modern);
        render_listing(&format!("Artifacts / {} (legacy)", run_id), &legacy);
    }
    Ok(())
}
