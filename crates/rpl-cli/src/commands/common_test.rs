use super::*;

#[test]
fn test_split_list() {
    assert_eq!(split_list("Currencies, Companies,,"), vec!["Currencies", "Companies"]);
    assert!(split_list(" ").is_empty());
}

#[test]
fn test_column_widths_count_characters() {
    let rows = vec![vec!["Dólar".to_string(), "x".to_string()]];
    assert_eq!(calculate_column_widths(&["NOMBRE", "S"], &rows), vec![6, 1]);
    let rows = vec![vec!["San Cristóbal".to_string()]];
    assert_eq!(calculate_column_widths(&["NOMBRE"], &rows), vec![13]);
}

#[test]
fn test_exit_code_displays_nothing() {
    assert_eq!(ExitCode(2).to_string(), "");
}
