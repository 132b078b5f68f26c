//! Tab-separated rendering of SHAP report rows.

use super::{ShapForceRow, ShapSummaryRow};

const DECIMALS: usize = 5;

pub fn summary_table(rows: &[ShapSummaryRow]) -> String {
    let mut out =
        String::from("rank\tfeature\tclass\tmean_shap_present\tmean_shap_absent\tn_present\tn_absent\n");
    for row in rows {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            row.rank,
            row.feature,
            row.class_name,
            format_optional(row.mean_shap_present),
            format_optional(row.mean_shap_absent),
            row.n_present,
            row.n_absent
        ));
    }
    out
}

pub fn force_table(rows: &[ShapForceRow]) -> String {
    let mut out = String::from("rank\tsample\tfeature\tfeature_value\tclass\tshap_value\n");
    for row in rows {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{:.DECIMALS$}\n",
            row.rank, row.sample, row.feature, row.feature_value, row.class_name, row.shap_value
        ));
    }
    out
}

fn format_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "NA".to_string(), |v| format!("{v:.DECIMALS$}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_missing_means_as_na() {
        let rows = vec![ShapSummaryRow {
            rank: 0,
            feature: "PF00005".to_string(),
            class_name: "binary".to_string(),
            mean_shap_present: Some(0.123456789),
            mean_shap_absent: None,
            n_present: 3,
            n_absent: 0,
        }];
        let table = summary_table(&rows);
        let line = table.lines().nth(1).unwrap();
        assert_eq!(line, "0\tPF00005\tbinary\t0.12346\tNA\t3\t0");
    }

    #[test]
    fn force_rows_round_shap_values() {
        let rows = vec![ShapForceRow {
            rank: 1,
            sample: "GCA_1".to_string(),
            feature: "PF1".to_string(),
            feature_value: 1.0,
            class_name: "binary".to_string(),
            shap_value: -0.000004,
        }];
        assert!(force_table(&rows).ends_with("1\tGCA_1\tPF1\t1\tbinary\t-0.00000\n"));
    }
}
