//! Batch planning: group tasks by count and projected bytes.

use crate::manifest::SeriesTask;

/// Split `tasks` into batches of at most `batch_size` tasks whose projected
/// bytes stay under `max_batch_bytes`. Tasks with unknown size are charged
/// `unknown_allowance` bytes. A single oversized task still gets its own
/// batch; nothing is dropped.
pub fn make_batches(
    tasks: Vec<SeriesTask>,
    batch_size: usize,
    max_batch_bytes: u64,
    unknown_allowance: u64,
) -> Vec<Vec<SeriesTask>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<SeriesTask> = Vec::new();
    let mut current_bytes = 0u64;

    for task in tasks {
        let projected = task.expected_size_bytes.unwrap_or(unknown_allowance);
        let over_count = current.len() >= batch_size;
        let over_bytes = !current.is_empty() && current_bytes + projected > max_batch_bytes;
        if over_count || over_bytes {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += projected;
        current.push(task);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn task(id: &str, size: Option<u64>) -> SeriesTask {
        SeriesTask {
            series_id: id.to_string(),
            collection_id: "c".to_string(),
            expected_instance_count: None,
            expected_size_bytes: size,
            source_locator: format!("https://h/{id}"),
            destination_path: PathBuf::from("/data/c").join(id),
        }
    }

    #[test]
    fn splits_by_count() {
        let tasks: Vec<_> = (0..5).map(|i| task(&format!("s{i}"), Some(1))).collect();
        let batches = make_batches(tasks, 2, u64::MAX, 0);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[2].len(), 1);
    }

    #[test]
    fn splits_by_projected_bytes() {
        let tasks = vec![
            task("a", Some(60)),
            task("b", Some(60)),
            task("c", Some(60)),
        ];
        let batches = make_batches(tasks, 10, 100, 0);
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn oversized_task_gets_own_batch() {
        let tasks = vec![task("big", Some(1000)), task("small", Some(1))];
        let batches = make_batches(tasks, 10, 100, 0);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0].series_id, "big");
    }

    #[test]
    fn unknown_sizes_charged_allowance() {
        let tasks = vec![task("a", None), task("b", None), task("c", None)];
        let batches = make_batches(tasks, 10, 100, 50);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
    }

    #[test]
    fn empty_input_no_batches() {
        assert!(make_batches(Vec::new(), 5, 100, 0).is_empty());
    }
}
