use crate::error::ReportError;
use crate::metrics::{ProjectMetrics, totals};
use crate::morphology::counted;

/// Render the wikitext bullet list inserted under the `Metriky` line.
pub fn render_report(
    collected: &[ProjectMetrics],
    participants: usize,
) -> Result<String, ReportError> {
    let sums = totals(collected);
    let participants = i64::try_from(participants).unwrap_or(i64::MAX);
    let mut text = String::from("\n");

    text.push_str(&format!(
        "* {} (v tom {} a {})\n",
        counted(participants, "zúčastněný editor")?,
        counted(sums.active_editors, "aktivní")?,
        counted(sums.new_users, "nově registrovaný")?,
    ));

    text.push_str(&format!(
        "* {} součet změn (={} + {}) v {} {}",
        counted(sums.absolute_sum, "byte")?,
        counted(sums.positive_sum, "přidaný")?,
        counted(sums.negative_sum, "odebraný")?,
        counted(sums.edits, "editace-6 provedená-6")?,
        counted(sums.editing_editors, "uživatel-7")?,
    ));
    if sums.absolute_sum > 0 {
        text.push_str(", a to:");
    }
    text.push('\n');

    for entry in collected.iter().filter(|entry| !entry.project.is_media()) {
        let metrics = &entry.metrics;
        if metrics.edits == 0 {
            continue;
        }
        text.push_str(&format!(
            "** na [[:{}|{}]]: {} {} – v tom {} (={} + {})\n",
            entry.project.interwiki,
            entry.project.name,
            counted(metrics.edits, "editace-6 provedená-6")?,
            counted(metrics.editing_editors, "uživatel-7")?,
            counted(metrics.edited_pages, "editovaný článek")?,
            counted(metrics.new_pages, "nově založený")?,
            counted(metrics.edited_pages - metrics.new_pages, "stávající")?,
        ));
    }

    if let Some(media) = collected
        .iter()
        .find(|entry| entry.project.is_media() && entry.metrics.files_uploaded > 0)
    {
        text.push_str(&format!(
            "** na [[:{}|{}]]: {} {}",
            media.project.interwiki,
            media.project.name,
            counted(media.metrics.files_uploaded, "soubor nahraný")?,
            counted(media.metrics.files_users, "uživatel-7")?,
        ));
    }

    Ok(text)
}

/// Insert `report` at `offset`, dropping its trailing newlines. Everything
/// else in `text` is kept byte for byte.
pub fn splice_report(text: &str, offset: usize, report: &str) -> Result<String, ReportError> {
    if offset > text.len() || !text.is_char_boundary(offset) {
        return Err(ReportError::InvalidOffset {
            offset,
            len: text.len(),
        });
    }
    let report = report.trim_end_matches('\n');
    let mut output = String::with_capacity(text.len() + report.len());
    output.push_str(&text[..offset]);
    output.push_str(report);
    output.push_str(&text[offset..]);
    Ok(output)
}

pub fn edit_summary(date_key: &str) -> String {
    format!("automaticky generované metriky za den {date_key}")
}
