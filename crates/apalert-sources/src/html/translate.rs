//! Table extraction from the host's player-facing tracker pages.
//!
//! Everything here is synchronous: parsed documents never cross an await.

use std::collections::{BTreeMap, HashMap};

use apalert_core::slot::ItemRow;
use apalert_core::{SessionSnapshot, SlotMeta};
use scraper::{ElementRef, Html, Selector};

use crate::error::SourceError;

/// Title of the host's 404 page, served with a 200 status.
pub const NOT_FOUND_TITLE: &str = "Page Not Found (404)";

/// Per-slot page contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotPage {
    /// `None` when the page has no received-items table.
    pub received: Option<Vec<ItemRow>>,
    pub checks: Option<BTreeMap<String, bool>>,
}

fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Malformed(format!("selector {css}: {e:?}")))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_owned()
}

fn check_not_found(doc: &Html) -> Result<(), SourceError> {
    let title = selector("title")?;
    let not_found = doc
        .select(&title)
        .next()
        .is_some_and(|t| cell_text(t) == NOT_FOUND_TITLE);
    if not_found {
        return Err(SourceError::Disabled { status: 404 });
    }
    Ok(())
}

/// Map each body row of `table` to `{header: cell}`.
fn process_table(table: ElementRef<'_>) -> Result<Vec<HashMap<String, String>>, SourceError> {
    let th = selector("th")?;
    let tr = selector("tr")?;
    let td = selector("td")?;
    let headers: Vec<String> = table.select(&th).map(cell_text).collect();
    Ok(table
        .select(&tr)
        .filter_map(|row| {
            let cells: Vec<String> = row.select(&td).map(cell_text).collect();
            (!cells.is_empty()).then(|| headers.iter().cloned().zip(cells).collect())
        })
        .collect())
}

fn find_table<'a>(doc: &'a Html, id: &str) -> Result<Option<ElementRef<'a>>, SourceError> {
    let css = selector(&format!("#{id}"))?;
    Ok(doc.select(&css).next())
}

/// `"12/40"` or `"12"`.
fn parse_checks(raw: &str) -> (u32, u32) {
    match raw.split_once('/') {
        Some((done, total)) => (
            done.trim().parse().unwrap_or_default(),
            total.trim().parse().unwrap_or_default(),
        ),
        None => (raw.trim().parse().unwrap_or_default(), 0),
    }
}

/// Session root page: the `checks-table` of every slot.
pub fn parse_session_page(html: &str) -> Result<SessionSnapshot, SourceError> {
    let doc = Html::parse_document(html);
    check_not_found(&doc)?;
    let table = find_table(&doc, "checks-table")?
        .ok_or_else(|| SourceError::Malformed("no checks-table".into()))?;

    let mut snapshot = SessionSnapshot::default();
    for row in process_table(table)? {
        let Some(position) = row.get("#").and_then(|p| p.parse().ok()) else {
            continue;
        };
        let mut meta = SlotMeta::new(position);
        if let Some(name) = row.get("Name").filter(|n| !n.is_empty()) {
            meta.name.clone_from(name);
        }
        meta.game = row.get("Game").filter(|g| !g.is_empty()).cloned();
        if let Some(checks) = row.get("Checks") {
            (meta.checks_done, meta.checks_total) = parse_checks(checks);
        }
        snapshot.slots.insert(position, meta);
    }
    Ok(snapshot)
}

/// Per-slot page: received items plus location checks.
pub fn parse_slot_page(html: &str) -> Result<SlotPage, SourceError> {
    let doc = Html::parse_document(html);
    check_not_found(&doc)?;

    let received = match find_table(&doc, "received-table")? {
        None => None,
        Some(table) => Some(
            process_table(table)?
                .into_iter()
                .filter_map(|row| {
                    let name = row.get("Item")?.clone();
                    let order = row.get("Last Order Received")?.parse().ok()?;
                    let quantity = row
                        .get("Amount")
                        .and_then(|a| a.parse().ok())
                        .unwrap_or(1);
                    Some(ItemRow {
                        order,
                        name,
                        quantity,
                        flag: None,
                    })
                })
                .collect(),
        ),
    };

    let checks = match find_table(&doc, "locations-table")? {
        None => None,
        Some(table) => Some(
            process_table(table)?
                .into_iter()
                .filter_map(|row| {
                    let location = row.get("Location")?.clone();
                    let checked = row.get("Checked").is_some_and(|c| !c.is_empty());
                    Some((location, checked))
                })
                .collect(),
        ),
    };

    Ok(SlotPage { received, checks })
}
