use crate::ast::{Avt, NumberAction, NumberLevel};
use crate::error::XsltError;
use crate::frame::Outcome;
use crate::keys::document_nodes;
use crate::number::format_numbers;
use crate::processor::Processor;
use trellis_xpath1::{DataSourceNode, NodeType, number_to_string};

pub(crate) fn handle_number<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    number: &'s NumberAction,
) -> Result<Outcome, XsltError> {
    let text = match number.value {
        Some(value) => {
            let value = processor.evaluate(index, value)?.to_number();
            let rounded = (value + 0.5).floor();
            if !rounded.is_finite() || rounded < 0.0 {
                number_to_string(value)
            } else {
                let numbers = [rounded as u64];
                format_list(processor, index, number, &numbers)?
            }
        }
        None => {
            let numbers = count(processor, index, number)?;
            format_list(processor, index, number, &numbers)?
        }
    };
    let accepted = processor.emit(|out| out.text(&text, false))?;
    Ok(if accepted { Outcome::Finished } else { Outcome::Suspended })
}

fn format_list<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &Processor<'s, 'a, 'o, N>,
    index: usize,
    number: &'s NumberAction,
    numbers: &[u64],
) -> Result<String, XsltError> {
    let format = processor.avt(index, &number.format)?;
    let separator = optional(processor, index, number.grouping_separator.as_ref())?;
    let size = optional(processor, index, number.grouping_size.as_ref())?
        .and_then(|s| s.trim().parse::<usize>().ok());
    let grouping = match (&separator, size) {
        (Some(separator), Some(size)) if size > 0 => Some((separator.as_str(), size)),
        _ => None,
    };
    Ok(format_numbers(numbers, &format, grouping))
}

fn optional<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &Processor<'s, 'a, 'o, N>,
    index: usize,
    avt: Option<&'s Avt>,
) -> Result<Option<String>, XsltError> {
    avt.map(|avt| processor.avt(index, avt).map(|v| v.into_owned()))
        .transpose()
}

/// Whether `candidate` is counted: it matches `count`, or without one it has
/// the same kind and expanded name as the node being numbered.
fn counted<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &Processor<'s, 'a, 'o, N>,
    index: usize,
    number: &NumberAction,
    target: N,
    candidate: N,
) -> Result<bool, XsltError> {
    if let Some(count) = number.count {
        return processor.matches_at(index, count, candidate);
    }
    if candidate.node_type() != target.node_type() {
        return Ok(false);
    }
    let local = |n: N| n.name().map(|q| q.local_part);
    Ok(local(candidate) == local(target) && candidate.namespace_uri() == target.namespace_uri())
}

fn is_from<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &Processor<'s, 'a, 'o, N>,
    index: usize,
    number: &NumberAction,
    candidate: N,
) -> Result<bool, XsltError> {
    match number.from {
        Some(from) => processor.matches_at(index, from, candidate),
        None => Ok(false),
    }
}

/// 1-based position of `node` among its counted preceding siblings.
fn sibling_number<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &Processor<'s, 'a, 'o, N>,
    index: usize,
    number: &NumberAction,
    target: N,
    node: N,
) -> Result<u64, XsltError> {
    if node.node_type() == NodeType::Attribute {
        return Ok(1);
    }
    let Some(parent) = node.parent() else {
        return Ok(1);
    };
    let mut position = 1;
    for sibling in parent.children() {
        if sibling == node {
            break;
        }
        if counted(processor, index, number, target, sibling)? {
            position += 1;
        }
    }
    Ok(position)
}

fn count<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &Processor<'s, 'a, 'o, N>,
    index: usize,
    number: &NumberAction,
) -> Result<Vec<u64>, XsltError> {
    let target = processor.frames[index].node;
    match number.level {
        NumberLevel::Single | NumberLevel::Multiple => {
            let mut numbers = Vec::new();
            let mut current = Some(target);
            while let Some(node) = current {
                if is_from(processor, index, number, node)? {
                    break;
                }
                if counted(processor, index, number, target, node)? {
                    numbers.push(sibling_number(processor, index, number, target, node)?);
                    if number.level == NumberLevel::Single {
                        break;
                    }
                }
                current = node.parent();
            }
            numbers.reverse();
            Ok(numbers)
        }
        NumberLevel::Any => {
            let mut total = 0;
            for node in document_nodes(target.root()) {
                if is_from(processor, index, number, node)? {
                    total = 0;
                }
                if counted(processor, index, number, target, node)? {
                    total += 1;
                }
                if node == target {
                    break;
                }
            }
            Ok(if total == 0 { Vec::new() } else { vec![total] })
        }
    }
}
