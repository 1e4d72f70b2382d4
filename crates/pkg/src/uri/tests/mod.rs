use super::*;

const DIGEST: &str = "sha256:4f53cda18c2baa0c0354bb5f9a3ecbe5ed12ab4d8e11ba873c2f11161202b945";

fn render(r: &OciReference) -> String {
    format!(
        "{} | {} | {} | {}",
        r.registry,
        r.repository,
        r.tag.as_deref().unwrap_or("-"),
        r.digest.as_deref().map(|d| &d[..15]).unwrap_or("-"),
    )
}

#[test]
fn reference_snapshot() -> Result<(), UriError> {
    let inputs = [
        "oci://ghcr.io/kcl-lang/helloworld:0.1.0".to_owned(),
        "ghcr.io/kcl-lang/k8s:1.28".to_owned(),
        "localhost:5000/test/pkg".to_owned(),
        format!("oci://reg.example.com/a/b@{DIGEST}"),
        format!("reg.example.com/a/b:v1@{DIGEST}"),
    ];
    let results = inputs
        .iter()
        .map(|s| s.parse::<OciReference>().map(|r| render(&r)))
        .collect::<Result<Vec<_>, _>>()?;

    insta::assert_snapshot!(results.join("\n"), @r"
    ghcr.io | kcl-lang/helloworld | 0.1.0 | -
    ghcr.io | kcl-lang/k8s | 1.28 | -
    localhost:5000 | test/pkg | - | -
    reg.example.com | a/b | - | sha256:4f53cda1
    reg.example.com | a/b | v1 | sha256:4f53cda1
    ");
    Ok(())
}

#[test]
fn display_is_canonical() -> Result<(), UriError> {
    let r: OciReference = "ghcr.io/kcl-lang/k8s:1.28".parse()?;
    assert_eq!(r.to_string(), "oci://ghcr.io/kcl-lang/k8s:1.28");
    assert_eq!(r.to_string().parse::<OciReference>()?, r);
    Ok(())
}

#[test]
fn invalid_references() {
    for input in [
        "oci://ghcr.io",
        "ghcr.io/Upper/case:1",
        "ghcr.io/a:bad tag",
        "ghcr.io//double:1",
        "ghcr.io/a@sha256:short",
    ] {
        assert_eq!(
            input.parse::<OciReference>(),
            Err(UriError::Invalid(input.to_owned())),
            "{input} should be rejected"
        );
    }
}

#[test]
fn registry_shorthand_and_pinning() -> Result<(), UriError> {
    let r = OciReference::in_registry("ghcr.io", "kcl-lang/", "k8s", "1.28");
    assert_eq!(r.to_string(), "oci://ghcr.io/kcl-lang/k8s:1.28");
    assert_eq!(r.reference(), Some("1.28"));

    let bare: OciReference = "oci://ghcr.io/kcl-lang/helloworld".parse()?;
    assert_eq!(
        bare.clone().pinned(),
        Err(UriError::Unpinned("oci://ghcr.io/kcl-lang/helloworld".into()))
    );
    let tagged = bare.with_tag(Some("0.1.0".into())).pinned()?;
    assert_eq!(tagged.reference(), Some("0.1.0"));

    let both: OciReference = format!("reg.example.com/a/b:v1@{DIGEST}").parse()?;
    assert_eq!(both.reference(), Some(DIGEST));
    Ok(())
}
