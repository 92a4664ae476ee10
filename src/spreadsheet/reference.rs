//! A1-style cell reference conversions. Rows and columns are 1-based.

/// Converts a 1-based column number to its letters (1 => "A", 27 => "AA").
pub fn column_name(mut column: u32) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        column -= 1;
        letters.push(b'A' + (column % 26) as u8);
        column /= 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Converts column letters (case-insensitive) to a 1-based column number.
pub fn column_number(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    letters.chars().try_fold(0u32, |number, character| {
        let character = character.to_ascii_uppercase();
        character
            .is_ascii_uppercase()
            .then(|| number * 26 + (character as u32 - 'A' as u32 + 1))
    })
}

/// Formats a (row, column) pair as an A1 reference.
pub fn cell_reference(row: u32, column: u32) -> String {
    format!("{}{}", column_name(column), row)
}

/// Parses an A1 reference (absolute markers allowed) into (row, column).
pub fn parse_reference(reference: &str) -> Option<(u32, u32)> {
    let reference = reference.replace('$', "");
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    let column = column_number(letters)?;
    let row = digits.parse::<u32>().ok().filter(|row| *row > 0)?;
    Some((row, column))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_names() {
        assert_eq!(column_name(1), "A");
        assert_eq!(column_name(8), "H");
        assert_eq!(column_name(26), "Z");
        assert_eq!(column_name(27), "AA");
        assert_eq!(column_name(703), "AAA");
        assert_eq!(column_number("h"), Some(8));
        assert_eq!(column_number("AA"), Some(27));
        assert_eq!(column_number("A1"), None);
        assert_eq!(column_number(""), None);
    }

    #[test]
    fn references() {
        assert_eq!(cell_reference(20, 2), "B20");
        assert_eq!(parse_reference("B20"), Some((20, 2)));
        assert_eq!(parse_reference("$AB$7"), Some((7, 28)));
        assert_eq!(parse_reference("B0"), None);
        assert_eq!(parse_reference("20"), None);
    }
}
