use serde::Serialize;

/// Per-viewer aggregate over the requests the viewer can see (same scope as
/// List). Field names match the JSON contract of the dashboard endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCounts {
    pub total_requests: i64,
    pub pending_requests: i64,
    pub completed_requests: i64,
    pub efficiency: f64,
}

impl DashboardCounts {
    pub fn new(total: i64, pending: i64, completed: i64) -> Self {
        Self {
            total_requests: total,
            pending_requests: pending,
            completed_requests: completed,
            efficiency: efficiency(completed, total),
        }
    }
}

/// completed / total * 100, rounded to two decimal places. Zero when the
/// viewer has no visible requests.
pub fn efficiency(completed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let ratio = completed as f64 / total as f64 * 100.0;
    (ratio * 100.0).round() / 100.0
}
