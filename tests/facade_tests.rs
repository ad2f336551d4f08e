mod common;

use common::{TestResult, init_logger, text_sheet, xml_sheet};
use std::fs;
use trellis::xslt::OutputMethod;
use trellis::{TransformBuilder, TransformConfig};

#[test]
fn test_stylesheet_file_with_relative_include() -> TestResult {
    init_logger();
    let dir = tempfile::tempdir()?;
    fs::create_dir(dir.path().join("lib"))?;
    fs::write(
        dir.path().join("lib/names.xsl"),
        text_sheet(r#"<xsl:template match="person"><xsl:value-of select="@name"/>;</xsl:template>"#),
    )?;
    fs::write(
        dir.path().join("main.xsl"),
        text_sheet(r#"<xsl:include href="lib/names.xsl"/>"#),
    )?;

    let transformer = TransformBuilder::new()
        .with_stylesheet_file(dir.path().join("main.xsl"))?
        .build()?;
    let out = transformer.transform_str(r#"<people><person name="Ada"/><person name="Alan"/></people>"#)?;
    assert_eq!(out, "Ada;Alan;");
    Ok(())
}

#[test]
fn test_transform_file_writes_output() -> TestResult {
    init_logger();
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.xml");
    let output = dir.path().join("out.xml");
    fs::write(&input, "<r><i>1</i><i>2</i></r>")?;

    let transformer = TransformBuilder::new()
        .with_stylesheet_source(
            &xml_sheet(
                r#"<xsl:template match="/"><sum><xsl:value-of select="sum(r/i)"/></sum><xsl:message>summed</xsl:message></xsl:template>"#,
            ),
            "sum.xsl",
        )
        .build()?;
    let report = transformer.transform_file(&input, &output)?;

    assert_eq!(fs::read_to_string(&output)?, "<sum>3</sum>\n");
    assert_eq!(report.messages, vec!["summed".to_string()]);
    Ok(())
}

#[test]
fn test_transform_file_reports_missing_input() -> TestResult {
    init_logger();
    let dir = tempfile::tempdir()?;
    let transformer = TransformBuilder::new()
        .with_stylesheet_source(&text_sheet(""), "empty.xsl")
        .build()?;
    let err = transformer
        .transform_file(dir.path().join("missing.xml"), dir.path().join("out.txt"))
        .unwrap_err();
    assert!(err.to_string().contains("missing.xml"), "{}", err);
    Ok(())
}

#[test]
fn test_configuration_file_drives_the_builder() -> TestResult {
    init_logger();
    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join("greet.xsl"),
        xml_sheet(
            r#"<xsl:param name="greeting" select="'Hi'"/>
               <xsl:template match="/"><plain/></xsl:template>
               <xsl:template match="/" mode="fancy"><xsl:value-of select="concat($greeting, ', ', *)"/></xsl:template>"#,
        ),
    )?;
    let config_path = dir.path().join("run.json");
    fs::write(
        &config_path,
        r#"{
            "stylesheet": "greet.xsl",
            "parameters": { "greeting": "Hello" },
            "mode": "fancy",
            "output": { "method": "text" }
        }"#,
    )?;

    let config = TransformConfig::from_file(&config_path)?;
    assert_eq!(config.stylesheet.as_deref(), Some(dir.path().join("greet.xsl").as_path()));

    let transformer = TransformBuilder::new().with_config(&config)?.build()?;
    assert_eq!(transformer.output_settings().method, Some(OutputMethod::Text));
    assert_eq!(transformer.transform_str("<name>world</name>")?, "Hello, world");
    Ok(())
}

#[test]
fn test_later_builder_calls_override_configuration() -> TestResult {
    init_logger();
    let config = TransformConfig::from_json(r#"{ "parameters": { "p": "config" }, "mode": "m" }"#)?;
    let transformer = TransformBuilder::new()
        .with_stylesheet_source(
            &text_sheet(
                r#"<xsl:param name="p"/>
                   <xsl:template match="/">default:<xsl:value-of select="$p"/></xsl:template>
                   <xsl:template match="/" mode="m">m:<xsl:value-of select="$p"/></xsl:template>"#,
            ),
            "p.xsl",
        )
        .with_config(&config)?
        .with_parameter("p", "builder")
        .build()?;
    assert_eq!(transformer.transform_str("<r/>")?, "m:builder");
    Ok(())
}

#[test]
fn test_unknown_configuration_fields_are_rejected() {
    init_logger();
    assert!(TransformConfig::from_json(r#"{ "stylesheet": "a.xsl", "colour": "red" }"#).is_err());
}

#[test]
fn test_one_transformer_serves_many_threads() -> TestResult {
    init_logger();
    let transformer = TransformBuilder::new()
        .with_stylesheet_source(
            &text_sheet(r#"<xsl:template match="/"><xsl:value-of select="count(//n) * 2"/></xsl:template>"#),
            "count.xsl",
        )
        .build()?;

    let outputs = std::thread::scope(|scope| {
        let handles: Vec<_> = (1..=4)
            .map(|count| {
                let transformer = transformer.clone();
                scope.spawn(move || {
                    let source = format!("<r>{}</r>", "<n/>".repeat(count));
                    transformer.transform_str(&source).map_err(|e| e.to_string())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| Err("thread panicked".to_string())))
            .collect::<Result<Vec<_>, _>>()
    })?;
    assert_eq!(outputs, vec!["2", "4", "6", "8"]);
    Ok(())
}
