mod common;

use common::{TestResult, text_sheet};
use std::fs;
use std::process::Command;

fn trellis() -> Command {
    Command::new(env!("CARGO_BIN_EXE_trellis"))
}

#[test]
fn test_cli_writes_to_stdout_and_messages_to_stderr() -> TestResult {
    let dir = tempfile::tempdir()?;
    let sheet = dir.path().join("s.xsl");
    let input = dir.path().join("in.xml");
    fs::write(
        &sheet,
        text_sheet(
            r#"<xsl:param name="sep" select="','"/>
               <xsl:template match="/"><xsl:message>running</xsl:message><xsl:for-each select="r/i"><xsl:value-of select="concat(., $sep)"/></xsl:for-each></xsl:template>"#,
        ),
    )?;
    fs::write(&input, "<r><i>a</i><i>b</i></r>")?;

    let output = trellis()
        .arg(&input)
        .arg("--stylesheet")
        .arg(&sheet)
        .args(["--param", "sep=;"])
        .output()?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8(output.stdout)?, "a;b;");
    assert!(String::from_utf8(output.stderr)?.contains("running"));
    Ok(())
}

#[test]
fn test_cli_output_file_and_method_override() -> TestResult {
    let dir = tempfile::tempdir()?;
    let sheet = dir.path().join("s.xsl");
    let input = dir.path().join("in.xml");
    let out = dir.path().join("out.txt");
    fs::write(
        &sheet,
        common::xml_sheet(r#"<xsl:template match="/"><doc><xsl:value-of select="name(*)"/></doc></xsl:template>"#),
    )?;
    fs::write(&input, "<root/>")?;

    let status = trellis()
        .arg(&input)
        .arg("-s")
        .arg(&sheet)
        .arg("-o")
        .arg(&out)
        .args(["--method", "text"])
        .status()?;
    assert!(status.success());
    assert_eq!(fs::read_to_string(&out)?, "root");
    Ok(())
}

#[test]
fn test_cli_fails_without_stylesheet() -> TestResult {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.xml");
    fs::write(&input, "<r/>")?;

    let output = trellis().arg(&input).output()?;
    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("No stylesheet"));
    Ok(())
}

#[test]
fn test_cli_rejects_malformed_parameters() -> TestResult {
    let output = trellis().args(["in.xml", "--param", "novalue"]).output()?;
    assert!(!output.status.success());
    Ok(())
}
