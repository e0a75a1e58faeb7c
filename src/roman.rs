//! Roman numeral rendering for specimen sub-numbers.

const NUMERALS: [(u32, &str); 13] = [
    (1000, "M"),
    (900, "CM"),
    (500, "D"),
    (400, "CD"),
    (100, "C"),
    (90, "XC"),
    (50, "L"),
    (40, "XL"),
    (10, "X"),
    (9, "IX"),
    (5, "V"),
    (4, "IV"),
    (1, "I"),
];

/// Render a numeric sub-number as a roman numeral.
///
/// Non-numeric sub-numbers (already roman, or free text like "1a") are
/// returned unchanged.
pub fn to_roman(value: &str) -> String {
    let Ok(mut number) = value.trim().parse::<u32>() else {
        return value.to_string();
    };

    let mut roman = String::new();
    for (step, numeral) in NUMERALS {
        while number >= step {
            roman.push_str(numeral);
            number -= step;
        }
    }
    roman
}
