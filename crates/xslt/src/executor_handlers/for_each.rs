use crate::ast::{Action, ActionId, Avt, SortSpec};
use crate::error::XsltError;
use crate::frame::{FrameState, NodeCursor, Outcome};
use crate::processor::Processor;
use crate::query_store::QueryId;
use crate::sort::{CaseOrder, DataType, SortKey, SortValue, sort_by_keys};
use crate::util::is_qname;
use trellis_xpath1::DataSourceNode;

pub(crate) fn handle_for_each<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    select: QueryId,
    sorts: &[ActionId],
    body: ActionId,
) -> Result<Outcome, XsltError> {
    if matches!(processor.frames[index].state, FrameState::Start) {
        let nodes = processor.evaluate(index, select)?.into_node_set()?;
        let nodes = sort_nodes(processor, index, nodes, sorts)?;
        processor.frames[index].state = FrameState::Nodes(NodeCursor::new(nodes));
    }

    let FrameState::Nodes(cursor) = &mut processor.frames[index].state else {
        return Ok(Outcome::Finished);
    };
    let size = cursor.size();
    let Some((node, position)) = cursor.advance() else {
        return Ok(Outcome::Finished);
    };
    let mut frame = processor.frames[index].child(index, body);
    frame.node = node;
    frame.position = position;
    frame.size = size;
    frame.rule = None;
    processor.push_frame(frame);
    Ok(Outcome::Continue)
}

/// Orders `nodes` by the `xsl:sort` children of an instruction. Without any,
/// the nodes keep document order.
pub(crate) fn sort_nodes<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &Processor<'s, 'a, 'o, N>,
    index: usize,
    nodes: Vec<N>,
    sorts: &[ActionId],
) -> Result<Vec<N>, XsltError> {
    if sorts.is_empty() || nodes.len() < 2 {
        return Ok(nodes);
    }
    let stylesheet = processor.stylesheet;
    let specs: Vec<&SortSpec> = sorts
        .iter()
        .filter_map(|&id| match stylesheet.action(id) {
            Action::Sort(spec) => Some(spec),
            _ => None,
        })
        .collect();

    let mut keys = Vec::with_capacity(specs.len());
    for &spec in &specs {
        keys.push(sort_key(processor, index, spec)?);
    }

    let size = nodes.len();
    let mut values = Vec::with_capacity(size);
    for (i, &node) in nodes.iter().enumerate() {
        let mut row = Vec::with_capacity(specs.len());
        for (spec, key) in specs.iter().zip(&keys) {
            let value = processor.evaluate_at(index, spec.select, node, i + 1, size)?;
            row.push(match key.data_type {
                DataType::Text => SortValue::Text(value.to_string()),
                DataType::Number => SortValue::Number(value.to_number()),
            });
        }
        values.push(row);
    }
    Ok(sort_by_keys(nodes, values, &keys))
}

fn attribute<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &Processor<'s, 'a, 'o, N>,
    index: usize,
    avt: Option<&'s Avt>,
) -> Result<Option<String>, XsltError> {
    avt.map(|avt| processor.avt(index, avt).map(|v| v.trim().to_string()))
        .transpose()
}

fn sort_key<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &Processor<'s, 'a, 'o, N>,
    index: usize,
    spec: &'s SortSpec,
) -> Result<SortKey, XsltError> {
    // Unknown values are tolerated in forwards-compatible mode, and
    // prefixed data types are extensions this processor does not know.
    let lenient = |attr: &str, value: &str| -> Result<(), XsltError> {
        if spec.forwards_compatible || (value.contains(':') && is_qname(value)) {
            log::warn!("Ignoring unknown xsl:sort {} '{}'", attr, value);
            Ok(())
        } else {
            Err(XsltError::execution(format!("Invalid xsl:sort {} '{}'", attr, value)))
        }
    };

    let mut key = SortKey::default();
    if let Some(data_type) = attribute(processor, index, spec.data_type.as_ref())? {
        match data_type.as_str() {
            "text" => key.data_type = DataType::Text,
            "number" => key.data_type = DataType::Number,
            other => lenient("data-type", other)?,
        }
    }
    if let Some(order) = attribute(processor, index, spec.order.as_ref())? {
        match order.as_str() {
            "ascending" => key.descending = false,
            "descending" => key.descending = true,
            other => lenient("order", other)?,
        }
    }
    if let Some(case_order) = attribute(processor, index, spec.case_order.as_ref())? {
        match case_order.as_str() {
            "upper-first" => key.case_order = CaseOrder::UpperFirst,
            "lower-first" => key.case_order = CaseOrder::LowerFirst,
            other => lenient("case-order", other)?,
        }
    }
    key.lang = attribute(processor, index, spec.lang.as_ref())?;
    Ok(key)
}
