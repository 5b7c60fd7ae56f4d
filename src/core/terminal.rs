use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

/// Styled "speaker: message" line used by the agent personas
/// (router, orchestrator, evaluator, swarm).
pub fn agent_log(agent_name: &str, msg: &str) {
    println!("{} {}", style(format!("{}:", agent_name)).bold().cyan(), msg);
}

pub fn agent_warn(agent_name: &str, msg: &str) {
    println!(
        "{} {}",
        style(format!("{}:", agent_name)).bold().yellow(),
        msg
    );
}

pub fn agent_fail(agent_name: &str, msg: &str) {
    println!("{} {}", style(format!("{}:", agent_name)).bold().red(), msg);
}

pub fn print_banner() {
    let lines: &[&str] = &[
        " _                       ",
        "(_)_ ____   _____  __    ",
        "| | '_ \\ \\ / / _ \\/ /    ",
        "| | | | \\ V / (_) >  <   ",
        "|_|_| |_|\\_/ \\___/_/\\_\\  ",
    ];
    println!();
    for line in lines {
        println!("{}", style(line).cyan().bold());
    }
    println!(
        "{}\n",
        style("headless invoice automation + learning loop").dim()
    );
}

/// Minimal aligned-column table for command reports.
///
/// Column widths are computed from the longest cell. Cells are plain text;
/// styled escape sequences would break the width math.
pub struct ReportTable {
    title: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ReportTable {
    pub fn new(title: &str, headers: &[&str]) -> Self {
        Self {
            title: title.to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(&mut self, cells: &[&str]) -> &mut Self {
        let mut row: Vec<String> = cells.iter().map(|c| c.to_string()).collect();
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
        widths
    }

    pub fn print(&self) {
        let widths = self.widths();
        println!("\n {}", style(&self.title).bold().magenta());
        let header_line: Vec<String> = self
            .headers
            .iter()
            .zip(&widths)
            .map(|(h, w)| format!("{:<width$}", h, width = w))
            .collect();
        println!(" {}", style(header_line.join("  ")).bold().cyan());
        for row in &self.rows {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:<width$}", c, width = w))
                .collect();
            println!(" {}", line.join("  "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ReportTable;

    #[test]
    fn report_table_pads_short_rows_to_header_width() {
        let mut table = ReportTable::new("t", &["A", "B", "C"]);
        table.row(&["only-one"]);
        assert_eq!(table.rows[0].len(), 3);
        assert_eq!(table.rows[0][1], "");
    }

    #[test]
    fn report_table_widths_track_longest_cell() {
        let mut table = ReportTable::new("t", &["Name", "St"]);
        table.row(&["a-very-long-cell", "ok"]);
        assert_eq!(table.widths(), vec![16, 2]);
    }
}
