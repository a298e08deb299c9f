use super::run::{build_resolver, build_store, RunError};
use crate::config::parse::load_config;
use crate::fields::FieldReport;
use std::path::PathBuf;

/// Probe every canonical field against an index and print which concrete
/// field each resolves to.
pub async fn fields(
    config_path: Option<PathBuf>,
    index: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path.ok_or(RunError::ConfigNotFound)?;
    let config = load_config(&config_path)?;

    let store = build_store(&config.store).await?;
    let resolver = build_resolver(&config, store);
    let index = index.unwrap_or_else(|| config.store.index.clone());

    let report = resolver.report(&index).await?;
    print!("{}", render_report(&index, &report));
    Ok(())
}

fn render_report(index: &str, report: &[FieldReport]) -> String {
    let width = report
        .iter()
        .map(|row| row.canonical.len())
        .max()
        .unwrap_or(0)
        .max("CANONICAL".len());

    let mut out = format!("Field resolution for index '{}'\n\n", index);
    out.push_str(&format!("{:<width$}  RESOLVED\n", "CANONICAL", width = width));
    for row in report {
        let resolved = match &row.resolved {
            Some(field) => field.clone(),
            None => format!("(not found; tried {})", row.variants.join(", ")),
        };
        out.push_str(&format!("{:<width$}  {}\n", row.canonical, resolved, width = width));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_report() {
        let report = vec![
            FieldReport {
                canonical: "sourceIP".to_string(),
                resolved: Some("srcip".to_string()),
                variants: vec!["source.ip".to_string(), "srcip".to_string()],
            },
            FieldReport {
                canonical: "bytes".to_string(),
                resolved: None,
                variants: vec!["network.bytes".to_string(), "bytes".to_string()],
            },
        ];

        let rendered = render_report("fw", &report);
        assert!(rendered.contains("sourceIP   srcip"));
        assert!(rendered.contains("(not found; tried network.bytes, bytes)"));
    }
}
