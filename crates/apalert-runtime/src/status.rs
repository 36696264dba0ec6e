//! `apalert status`: a plain-text view of the trackers file.

use std::fmt::Write as _;

use crate::player::TrackerState;

/// Render one line per tracked slot, grouped by player.
pub fn render(state: &TrackerState) -> String {
    let mut out = String::new();
    if state.players.is_empty() {
        out.push_str("no players\n");
        return out;
    }
    for player in state.players.values() {
        let name = player.name.as_deref().unwrap_or(&player.id);
        let _ = writeln!(out, "{name} ({} slots)", player.slots.len());
        for slot in &player.slots {
            let checks = if slot.checks_total > 0 {
                format!("{}/{}", slot.checks_done, slot.checks_total)
            } else {
                "-".to_string()
            };
            let _ = writeln!(
                out,
                "  {:<24} {:<12} {:<10} items={:<5} checks={:<9} failures={}/{} {}",
                slot.display_name(),
                slot.game.as_deref().unwrap_or("?"),
                slot.progression.as_str(),
                slot.latest_item.max(0),
                checks,
                slot.errors.min(99),
                slot.failures,
                slot.url,
            );
        }
    }
    out
}
