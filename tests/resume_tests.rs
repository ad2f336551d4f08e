mod common;

use common::{CollectingSink, StutteringSink, TestResult, compile, drive, init_logger, xml_sheet};
use trellis::xslt::{
    ExecutionStatus, OutputSettings, Processor, Record, RecordKind, RecordOutput, XmlDocument, XmlSerializer,
};

const CATALOG: &str = r#"<catalog>
    <book id="b1"><title>Dune</title><price>9</price></book>
    <book id="b2"><title>Emma</title><price>4</price></book>
    <book id="b3"><title>Ulysses</title><price>12</price></book>
</catalog>"#;

fn catalog_sheet() -> String {
    xml_sheet(
        r#"<xsl:strip-space elements="*"/>
           <xsl:template match="/">
             <shelf>
               <xsl:apply-templates select="catalog/book">
                 <xsl:sort select="price" data-type="number"/>
               </xsl:apply-templates>
               <xsl:comment>end</xsl:comment>
             </shelf>
           </xsl:template>
           <xsl:template match="book">
             <xsl:variable name="label"><xsl:value-of select="title"/> (<xsl:number/>)</xsl:variable>
             <entry ref="{@id}">
               <xsl:attribute name="n"><xsl:value-of select="position()"/></xsl:attribute>
               <xsl:copy-of select="title"/>
               <xsl:value-of select="$label"/>
             </entry>
           </xsl:template>"#,
    )
}

fn serialize(records: &[Record], settings: OutputSettings) -> Result<String, Box<dyn std::error::Error>> {
    let mut serializer = XmlSerializer::new(Vec::new(), settings);
    for record in records {
        serializer.record_done(record)?;
    }
    serializer.the_end()?;
    Ok(String::from_utf8(serializer.into_inner())?)
}

#[test]
fn test_backpressure_does_not_lose_or_duplicate_records() -> TestResult {
    init_logger();
    let transformer = compile(&catalog_sheet())?;

    let mut straight = CollectingSink::default();
    let suspensions = drive(&transformer, CATALOG, &mut straight)?;
    assert_eq!(suspensions, 0);
    assert!(straight.ended);

    let mut stuttering = StutteringSink::default();
    let suspensions = drive(&transformer, CATALOG, &mut stuttering)?;
    assert!(stuttering.ended);
    assert_eq!(stuttering.records, straight.records);
    // Every record was refused once and interrupted once.
    assert_eq!(stuttering.offers, 2 * straight.records.len());
    assert!(suspensions >= straight.records.len());
    Ok(())
}

#[test]
fn test_resumed_output_serializes_identically() -> TestResult {
    init_logger();
    let transformer = compile(&catalog_sheet())?;
    let expected = transformer.transform_str(CATALOG)?;

    let mut stuttering = StutteringSink::default();
    drive(&transformer, CATALOG, &mut stuttering)?;
    assert_eq!(serialize(&stuttering.records, transformer.output_settings())?, expected);
    assert!(expected.starts_with("<shelf><entry ref=\"b2\" n=\"1\"><title>Emma</title>Emma (2)</entry>"));
    assert!(expected.ends_with("<!--end--></shelf>\n"));
    Ok(())
}

#[test]
fn test_same_input_gives_identical_output() -> TestResult {
    init_logger();
    let transformer = compile(&catalog_sheet())?;
    let first = transformer.transform_str(CATALOG)?;
    let second = transformer.transform_str(CATALOG)?;
    assert_eq!(first, second);

    let recompiled = compile(&catalog_sheet())?;
    assert_eq!(recompiled.stylesheet().actions, transformer.stylesheet().actions);
    assert_eq!(recompiled.transform_str(CATALOG)?, first);
    Ok(())
}

#[test]
fn test_record_cursor_yields_records_on_demand() -> TestResult {
    init_logger();
    let transformer = compile(&catalog_sheet())?;
    let document = transformer.parse_document(CATALOG)?;

    let mut cursor = transformer.records(&document);
    let first = cursor.next().ok_or("cursor is empty")??;
    assert_eq!(first.kind, RecordKind::Element);
    assert_eq!(first.name.local, "shelf");

    let rest: Vec<_> = cursor.collect::<Result<_, _>>()?;
    let titles = rest
        .iter()
        .filter(|r| r.kind == RecordKind::Element && r.name.local == "entry")
        .filter_map(|r| r.attribute("", "ref"))
        .collect::<Vec<_>>();
    assert_eq!(titles, vec!["b2", "b1", "b3"]);
    assert_eq!(rest.last().map(|r| r.kind), Some(RecordKind::EndElement));

    let mut all = vec![first];
    all.extend(rest);
    assert_eq!(serialize(&all, transformer.output_settings())?, transformer.transform_str(CATALOG)?);
    Ok(())
}

#[test]
fn test_record_cursor_stops_after_error() -> TestResult {
    init_logger();
    let sheet = xml_sheet(
        r#"<xsl:template match="/">
             <a/>
             <xsl:message terminate="yes">stop</xsl:message>
             <b/>
           </xsl:template>"#,
    );
    let transformer = compile(&sheet)?;
    let document = transformer.parse_document("<r/>")?;
    let results: Vec<_> = transformer.records(&document).collect();

    assert!(results.iter().any(|r| r.is_err()));
    assert!(results.last().is_some_and(|r| r.is_err()));
    let names: Vec<_> = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|r| r.name.local.as_str())
        .collect();
    assert!(!names.contains(&"b"));
    Ok(())
}

#[test]
fn test_cursor_passes_parameters_and_mode() -> TestResult {
    init_logger();
    let sheet = xml_sheet(
        r#"<xsl:param name="who" select="'nobody'"/>
           <xsl:template match="/"><default/></xsl:template>
           <xsl:template match="/" mode="greet"><hello to="{$who}"/></xsl:template>"#,
    );
    let transformer = trellis::TransformBuilder::new()
        .with_stylesheet_source(&sheet, "greet.xsl")
        .with_parameter("who", "Ada")
        .with_mode("greet")
        .build()?;
    let document = transformer.parse_document("<r/>")?;
    let records: Vec<_> = transformer.records(&document).collect::<Result<_, _>>()?;
    assert_eq!(records[0].name.local, "hello");
    assert_eq!(records[0].attribute("", "to"), Some("Ada"));
    Ok(())
}

#[test]
fn test_key_table_is_built_once_per_processor() -> TestResult {
    init_logger();
    let sheet = xml_sheet(
        r#"<xsl:key name="byId" match="book" use="@id"/>
           <xsl:template match="/">
             <found><xsl:for-each select="//book"><xsl:value-of select="key('byId', @id)/title"/></xsl:for-each></found>
           </xsl:template>"#,
    );
    let transformer = compile(&sheet)?;
    let document = XmlDocument::parse(CATALOG)?;
    let mut sink = CollectingSink::default();
    let mut processor = Processor::new(transformer.stylesheet(), document.root_node(), &mut sink);
    assert_eq!(processor.key_builds(), 0);
    while processor.execute()? != ExecutionStatus::Finished {}
    assert_eq!(processor.key_builds(), 1);
    drop(processor);

    let text: String = sink.records.iter().map(|r| r.value.as_str()).collect();
    assert_eq!(text, "DuneEmmaUlysses");
    Ok(())
}
