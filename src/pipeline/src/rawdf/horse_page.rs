//! Horse page parser: the race-history table.

use scraper::{Html, Selector};

use super::table_rows;

/// Parse the race-history table of a horse page. Returns `None` when no
/// history table is present.
pub fn parse_horse_page(html: &str, horse_id: &str) -> Option<Vec<Vec<(String, String)>>> {
    let document = Html::parse_document(html);

    for sel_str in ["table.db_h_race_results", "table.nk_tb_common"] {
        let Ok(selector) = Selector::parse(sel_str) else {
            continue;
        };
        for table in document.select(&selector) {
            let rows = table_rows(table);
            let is_history = rows
                .first()
                .is_some_and(|row| row.iter().any(|(column, _)| column == "日付"));
            if !is_history {
                continue;
            }
            return Some(
                rows.into_iter()
                    .map(|cells| {
                        let mut out = Vec::with_capacity(cells.len() + 1);
                        out.push(("horse_id".to_string(), horse_id.to_string()));
                        out.extend(cells);
                        out
                    })
                    .collect(),
            );
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html><body>
<table class="db_prof_table"><tr><th>生年月日</th><td>2020年3月1日</td></tr></table>
<table class="db_h_race_results nk_tb_common">
  <thead><tr><th>日付</th><th>開催</th><th>天 気</th><th>頭 数</th><th>着 順</th><th>距離</th><th>賞金</th></tr></thead>
  <tbody>
    <tr><td><a href="/race/list/20230416/">2023/04/16</a></td><td>3中山8</td><td>晴</td><td>18</td><td>1</td><td>芝2000</td><td>20,000.0</td></tr>
    <tr><td>2023/02/12</td><td>1東京6</td><td>曇</td><td>14</td><td>(降)3</td><td>芝1800</td><td></td></tr>
  </tbody>
</table>
</body></html>"#;

    #[test]
    fn test_history_rows_with_horse_id() {
        let rows = parse_horse_page(PAGE, "2020104385").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], ("horse_id".to_string(), "2020104385".to_string()));
        assert!(rows[0].contains(&("日付".to_string(), "2023/04/16".to_string())));
        assert!(rows[0].contains(&("天気".to_string(), "晴".to_string())));
        assert!(rows[1].contains(&("着順".to_string(), "(降)3".to_string())));
        assert!(rows[1].contains(&("賞金".to_string(), String::new())));
    }

    #[test]
    fn test_page_without_history() {
        let html = r#"<table class="db_prof_table"><tr><th>生年月日</th><td>x</td></tr></table>"#;
        assert!(parse_horse_page(html, "2020104385").is_none());
    }
}
