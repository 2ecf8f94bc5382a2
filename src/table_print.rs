use crate::metrics::TestMetrics;

/// Renders run totals and per-consumer counts as an aligned text table.
pub fn format_metrics_table(metrics: &TestMetrics) -> String {
    let mut rows: Vec<(String, String)> = vec![
        ("generated".to_string(), metrics.generated.to_string()),
        ("consumed".to_string(), metrics.consumed.to_string()),
        ("lag".to_string(), metrics.generated.saturating_sub(metrics.consumed).to_string()),
    ];
    for (id, count) in &metrics.consumers {
        rows.push((format!("consumer {}", id), format!("{} ({})", count, share(*count, metrics.consumed))));
    }

    let name_width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0).max(6);
    let value_width = rows.iter().map(|(_, value)| value.len()).max().unwrap_or(0).max(5);
    let border = format!("+-{}-+-{}-+", "-".repeat(name_width), "-".repeat(value_width));

    let mut out = String::new();
    out.push_str(&border);
    out.push('\n');
    out.push_str(&format!("| {:<name_width$} | {:>value_width$} |\n", "metric", "value"));
    out.push_str(&border);
    out.push('\n');
    for (name, value) in rows {
        out.push_str(&format!("| {:<name_width$} | {:>value_width$} |\n", name, value));
    }
    out.push_str(&border);
    out
}

pub fn print_metrics_table(metrics: &TestMetrics) {
    println!("{}", format_metrics_table(metrics));
}

fn share(count: u64, total: u64) -> String {
    if total == 0 {
        return "-".to_string();
    }
    format!("{:.1}%", count as f64 * 100.0 / total as f64)
}
