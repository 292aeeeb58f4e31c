//! Race result page parser.
//!
//! Extracts the results table, the race-info block and the payout tables of
//! a saved race page. Every value stays text.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{cell_text, table_rows};

/// Raw rows from one race page.
#[derive(Debug, Clone, Default)]
pub struct RacePage {
    pub results: Vec<Vec<(String, String)>>,
    pub race_info: Option<Vec<(String, String)>>,
    pub payouts: Vec<Vec<(String, String)>>,
}

/// Link patterns for ids found in a results row: (column, href part, id).
fn link_patterns() -> &'static [(&'static str, &'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, &'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            ("horse_id", "/horse/", Regex::new(r"\d{10}").expect("valid regex")),
            ("jockey_id", "/jockey/", Regex::new(r"\d{5}").expect("valid regex")),
            ("trainer_id", "/trainer/", Regex::new(r"\d{5}").expect("valid regex")),
            ("owner_id", "/owner/", Regex::new(r"\d{6}").expect("valid regex")),
        ]
    })
}

/// Parse a race page. Returns `None` when the results table is missing.
pub fn parse_race_page(html: &str, race_id: &str) -> Option<RacePage> {
    let document = Html::parse_document(html);

    let table = find_results_table(&document)?;
    let results = parse_results(table, race_id);
    if results.is_empty() {
        return None;
    }

    Some(RacePage {
        results,
        race_info: parse_race_info(&document, race_id),
        payouts: parse_payouts(&document, race_id),
    })
}

fn find_results_table(document: &Html) -> Option<ElementRef<'_>> {
    for selector_str in ["table.race_table_01.nk_tb_common", "table.race_table_01"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(table) = document.select(&selector).next() {
                return Some(table);
            }
        }
    }
    None
}

fn parse_results(table: ElementRef<'_>, race_id: &str) -> Vec<Vec<(String, String)>> {
    let (Ok(tr), Ok(td), Ok(link)) = (
        Selector::parse("tr"),
        Selector::parse("td"),
        Selector::parse("a[href]"),
    ) else {
        return Vec::new();
    };

    // Data rows in document order, aligned with table_rows output.
    let data_rows: Vec<ElementRef<'_>> = table
        .select(&tr)
        .filter(|row| row.select(&td).next().is_some())
        .collect();

    table_rows(table)
        .into_iter()
        .zip(data_rows)
        .map(|(cells, row)| {
            let mut out = Vec::with_capacity(cells.len() + 5);
            out.push(("race_id".to_string(), race_id.to_string()));
            out.extend(cells);
            for (column, part, re) in link_patterns() {
                let id = row
                    .select(&link)
                    .filter_map(|a| a.value().attr("href"))
                    .filter(|href| href.contains(part))
                    .find_map(|href| re.find(href).map(|m| m.as_str().to_string()));
                if let Some(id) = id {
                    out.push((column.to_string(), id));
                }
            }
            out
        })
        .collect()
}

fn parse_race_info(document: &Html, race_id: &str) -> Option<Vec<(String, String)>> {
    static INFO1: OnceLock<Regex> = OnceLock::new();
    static INFO2: OnceLock<Regex> = OnceLock::new();
    let info1_re = INFO1.get_or_init(|| Regex::new(r"[\w:]+").expect("valid regex"));
    let info2_re = INFO2.get_or_init(|| Regex::new(r"\w+").expect("valid regex"));

    let intro = Selector::parse("div.data_intro").ok()?;
    let h1 = Selector::parse("h1").ok()?;
    let p = Selector::parse("p").ok()?;

    let block = document.select(&intro).next()?;
    let title = block
        .select(&h1)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let mut paragraphs = block.select(&p).map(|e| e.text().collect::<String>());
    let first = paragraphs.next()?.replace(' ', "");
    let second = paragraphs.next().unwrap_or_default();

    let info1: Vec<&str> = info1_re.find_iter(&first).map(|m| m.as_str()).collect();
    let info2: Vec<&str> = info2_re.find_iter(&second).map(|m| m.as_str()).collect();

    Some(vec![
        ("race_id".to_string(), race_id.to_string()),
        ("title".to_string(), title),
        ("info1".to_string(), serde_json::to_string(&info1).ok()?),
        ("info2".to_string(), serde_json::to_string(&info2).ok()?),
    ])
}

/// One row per bet type: label, combinations and payouts, each cell's
/// `<br>` parts joined by a space.
fn parse_payouts(document: &Html, race_id: &str) -> Vec<Vec<(String, String)>> {
    let (Ok(table), Ok(tr), Ok(th), Ok(td)) = (
        Selector::parse("table.pay_table_01"),
        Selector::parse("tr"),
        Selector::parse("th"),
        Selector::parse("td"),
    ) else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    for pay_table in document.select(&table) {
        for row in pay_table.select(&tr) {
            let Some(label) = row.select(&th).next().map(cell_text) else {
                continue;
            };
            let cells: Vec<String> = row.select(&td).map(cell_text).collect();
            if cells.len() < 2 {
                continue;
            }
            rows.push(vec![
                ("race_id".to_string(), race_id.to_string()),
                ("bet_type".to_string(), label),
                ("win_umaban".to_string(), cells[0].clone()),
                ("return".to_string(), cells[1].clone()),
            ]);
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html><body>
<div class="data_intro">
  <dl class="racedata"><dd>
    <h1>皐月賞(G1)</h1>
    <p><span>芝右2000m / 天候 : 晴 / 芝 : 良 / 発走 : 15:40</span></p>
  </dd></dl>
  <p class="smalltxt">2023年4月16日 3回中山8日目 3歳オープン (国際)牡・牝(指)(定量)</p>
</div>
<table class="race_table_01 nk_tb_common">
  <tr><th>着 順</th><th>枠番</th><th>馬番</th><th>馬名</th><th>性齢</th><th>騎手</th><th>調教師</th><th>馬主</th></tr>
  <tr>
    <td>1</td><td>1</td><td>1</td>
    <td><a href="/horse/2020104385/">ソールオリエンス</a></td>
    <td>牡3</td>
    <td><a href="/jockey/result/recent/05339/">横山武史</a></td>
    <td>[東] <a href="/trainer/result/recent/01088/">手塚貴久</a></td>
    <td><a href="/owner/result/recent/226800/">社台RH</a></td>
  </tr>
  <tr>
    <td>中</td><td>8</td><td>18</td>
    <td><a href="/horse/2020102850/">ショウナンバシット</a></td>
    <td>牡3</td><td></td><td></td><td></td>
  </tr>
</table>
<table class="pay_table_01">
  <tr><th class="tan">単勝</th><td class="txt_r">1</td><td class="txt_r">1,090</td><td>5</td></tr>
  <tr><th class="wide">ワイド</th><td>1 - 5<br />1 - 14<br />5 - 14</td><td class="txt_r">320<br />1,060<br />550</td><td>3<br />15<br />6</td></tr>
</table>
<table class="pay_table_01">
  <tr><th class="sanrentan">三連単</th><td>1 → 14 → 5</td><td>35,430</td><td>104</td></tr>
</table>
</body></html>"#;

    #[test]
    fn test_results_with_link_ids() {
        let page = parse_race_page(PAGE, "202306030811").unwrap();
        assert_eq!(page.results.len(), 2);

        let first = &page.results[0];
        let get = |k: &str| first.iter().find(|(c, _)| c == k).map(|(_, v)| v.as_str());
        assert_eq!(get("race_id"), Some("202306030811"));
        assert_eq!(get("着順"), Some("1"));
        assert_eq!(get("性齢"), Some("牡3"));
        assert_eq!(get("horse_id"), Some("2020104385"));
        assert_eq!(get("jockey_id"), Some("05339"));
        assert_eq!(get("trainer_id"), Some("01088"));
        assert_eq!(get("owner_id"), Some("226800"));

        let second = &page.results[1];
        assert!(second.iter().any(|(c, v)| c == "着順" && v == "中"));
        assert!(!second.iter().any(|(c, _)| c == "jockey_id"));
    }

    #[test]
    fn test_race_info_tokens() {
        let page = parse_race_page(PAGE, "202306030811").unwrap();
        let info = page.race_info.unwrap();
        let get = |k: &str| info.iter().find(|(c, _)| c == k).map(|(_, v)| v.clone());
        assert_eq!(get("title").as_deref(), Some("皐月賞(G1)"));
        assert_eq!(
            get("info1").as_deref(),
            Some(r#"["芝右2000m","天候:晴","芝:良","発走:15:40"]"#)
        );
        let info2: Vec<String> = serde_json::from_str(&get("info2").unwrap()).unwrap();
        assert_eq!(info2[0], "2023年4月16日");
        assert!(info2.contains(&"3歳オープン".to_string()));
    }

    #[test]
    fn test_payout_rows_join_br_parts() {
        let page = parse_race_page(PAGE, "202306030811").unwrap();
        assert_eq!(page.payouts.len(), 3);
        let wide = &page.payouts[1];
        assert_eq!(wide[1], ("bet_type".to_string(), "ワイド".to_string()));
        assert_eq!(wide[2].1, "1 - 5 1 - 14 5 - 14");
        assert_eq!(wide[3].1, "320 1,060 550");
        assert_eq!(page.payouts[2][2].1, "1 → 14 → 5");
    }

    #[test]
    fn test_missing_results_table() {
        assert!(parse_race_page("<html><body><p>404</p></body></html>", "x").is_none());
    }
}
