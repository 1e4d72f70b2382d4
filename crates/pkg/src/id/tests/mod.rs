//! Tests for [`Name`], ensuring validation logic is correct.

use super::*;

#[test]
fn edge_cases() {
    assert_eq!(
        Name::try_from("α"),
        Ok(Name("α".into())),
        "Single valid Unicode character should be accepted"
    );

    assert_eq!(
        Name::try_from("_private"),
        Ok(Name("_private".into())),
        "Leading underscore is a valid identifier start"
    );

    assert_eq!(
        Name::try_from("ñ_1-k8s"),
        Ok(Name("ñ_1-k8s".into())),
        "Mix of Unicode, underscore, hyphen and number should be valid"
    );

    assert_eq!(
        Name::try_from("\u{200B}"),
        Err(Error::InvalidStart('\u{200B}')),
        "Zero-width space should be invalid start"
    );

    assert_eq!(
        Name::try_from("α\u{200B}"),
        Err(Error::InvalidCharacters("\u{200B}".into())),
        "Zero-width space should be invalid in the middle"
    );
}

#[test]
fn empty() {
    assert_eq!(Name::try_from(""), Err(Error::Empty));
}

#[test]
fn too_long() {
    let long = "a".repeat(NAME_MAX + 1);
    assert_eq!(Name::try_from(long.as_str()), Err(Error::TooLong));
    let max = "a".repeat(NAME_MAX);
    assert!(Name::try_from(max.as_str()).is_ok());
}

#[test]
fn invalid_chars() {
    let res = Name::try_from("a-!@#$%^&*()_-asdf");
    assert_eq!(res, Err(Error::InvalidCharacters("!@#$%^&*()".into())));
}

#[test]
fn invalid_start() {
    for s in ["9pkg", "'pkg", "-pkg", "%pkg", ".pkg"] {
        let res = Name::try_from(s);
        assert_eq!(
            res,
            Err(Error::InvalidStart(s.chars().next().unwrap())),
            "{s} should not be a valid start"
        );
    }
}

#[test]
fn not_normalized() {
    // "e" followed by a combining acute accent; NFC would compose it into "é"
    let decomposed = "cafe\u{0301}";
    assert_eq!(Name::try_from(decomposed), Err(Error::NotNormalized));
    assert!(Name::try_from("café").is_ok());
}

#[test]
fn import_name() {
    let name = Name::try_from("my-helper").unwrap();
    assert_eq!(name.import_name(), "my_helper");
    assert_eq!(name.to_string(), "my-helper");
}
