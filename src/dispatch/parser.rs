//! Rule document parser.
//!
//! Turns a `<msgDispatch>` document into a fully resolved
//! [`StatusConfigurationTable`]. Parsing is all-or-nothing: the first
//! validation failure aborts and nothing is returned, so a caller holding an
//! active table keeps it.
//!
//! ```xml
//! <msgDispatch defaultStatus='64k' defaultAction='send'>
//!   <onStatus oid='_bandwidth.status' content='64k' defaultAction='send'>
//!     <action do='send'  ifPriority='7-9'/>
//!     <action do='queue,notifySender'  ifPriority='6'/>
//!     <action do='queue'  ifPriority='4-5'/>
//!     <action do='destroy'  ifPriority='0-3'/>
//!   </onStatus>
//! </msgDispatch>
//! ```

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::dispatch::action::ActionSet;
use crate::dispatch::priority::{Priority, PriorityRange};
use crate::dispatch::table::{ConnectionState, RuleBlock, StatusConfigurationTable};
use crate::utils::error::RuleError;

const ROOT: &str = "msgDispatch";
const ON_STATUS: &str = "onStatus";
const ACTION: &str = "action";

/// Parses a rule document. Empty or whitespace-only input yields the
/// default table, which sends every priority.
pub fn parse(document: &str) -> Result<StatusConfigurationTable, RuleError> {
    if document.trim().is_empty() {
        return Ok(StatusConfigurationTable::default());
    }

    let mut reader = Reader::from_str(document);
    let mut doc = DocumentBuilder::default();

    loop {
        match reader
            .read_event()
            .map_err(|e| RuleError::Xml(e.to_string()))?
        {
            Event::Start(e) => doc.open(&e, false)?,
            Event::Empty(e) => doc.open(&e, true)?,
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                doc.close(&name)?;
            }
            Event::Text(t) => {
                if !t.iter().all(u8::is_ascii_whitespace) {
                    return Err(RuleError::Xml("unexpected text content".into()));
                }
            }
            Event::CData(_) => return Err(RuleError::Xml("unexpected CDATA content".into())),
            Event::Eof => break,
            // declaration, comments, processing instructions, doctype
            _ => {}
        }
    }

    doc.finish()
}

#[derive(Default)]
struct DocumentBuilder {
    root: Option<RootAttrs>,
    root_closed: bool,
    block: Option<BlockBuilder>,
    in_action: bool,
    blocks: Vec<RuleBlock>,
}

struct RootAttrs {
    default_status: Option<String>,
    default_action: ActionSet,
}

struct BlockBuilder {
    oid: String,
    content: String,
    connection_state: Option<ConnectionState>,
    default_action: ActionSet,
    overrides: [Option<ActionSet>; Priority::COUNT],
}

impl DocumentBuilder {
    fn open(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<(), RuleError> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let attrs = attributes(e)?;

        match name.as_str() {
            ROOT if self.root.is_none() => {
                self.root = Some(parse_root(&attrs)?);
                self.root_closed = empty;
            }
            ON_STATUS if self.inside_root() && self.block.is_none() => {
                let root_default = self.root.as_ref().map_or(ActionSet::SEND, |r| r.default_action);
                let block = parse_block(&attrs, root_default)?;
                if empty {
                    self.blocks.push(block.build());
                } else {
                    self.block = Some(block);
                }
            }
            ACTION if self.block.is_some() && !self.in_action => {
                let (action, range) = parse_action(&attrs)?;
                if let Some(block) = self.block.as_mut() {
                    block.apply(action, range)?;
                }
                self.in_action = !empty;
            }
            _ => return Err(RuleError::UnknownElement(name)),
        }
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<(), RuleError> {
        match name {
            ACTION if self.in_action => self.in_action = false,
            ON_STATUS if self.block.is_some() && !self.in_action => {
                if let Some(block) = self.block.take() {
                    self.blocks.push(block.build());
                }
            }
            ROOT if self.inside_root() && self.block.is_none() => self.root_closed = true,
            _ => return Err(RuleError::Xml(format!("unexpected closing tag </{name}>"))),
        }
        Ok(())
    }

    fn inside_root(&self) -> bool {
        self.root.is_some() && !self.root_closed
    }

    fn finish(self) -> Result<StatusConfigurationTable, RuleError> {
        let Some(root) = self.root else {
            return Err(RuleError::Xml(format!("missing <{ROOT}> root element")));
        };
        if !self.root_closed || self.block.is_some() {
            return Err(RuleError::Xml("unexpected end of document".into()));
        }
        StatusConfigurationTable::new(root.default_status, root.default_action, self.blocks)
    }
}

impl BlockBuilder {
    fn apply(&mut self, action: ActionSet, range: PriorityRange) -> Result<(), RuleError> {
        for p in range.iter() {
            let slot = &mut self.overrides[p.index()];
            if slot.is_some() {
                return Err(RuleError::OverlappingPriority {
                    content: self.content.clone(),
                    priority: p.value(),
                });
            }
            *slot = Some(action);
        }
        Ok(())
    }

    fn build(self) -> RuleBlock {
        RuleBlock::new(
            Some(self.oid),
            Some(self.content),
            self.connection_state,
            self.default_action,
            self.overrides,
        )
    }
}

fn attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>, RuleError> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| RuleError::Xml(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| RuleError::Xml(err.to_string()))?
            .into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn unknown(element: &str, attribute: &str) -> RuleError {
    RuleError::UnknownAttribute {
        element: element.to_string(),
        attribute: attribute.to_string(),
    }
}

fn missing(element: &str, attribute: &str) -> RuleError {
    RuleError::MissingAttribute {
        element: element.to_string(),
        attribute: attribute.to_string(),
    }
}

fn parse_root(attrs: &[(String, String)]) -> Result<RootAttrs, RuleError> {
    let mut root = RootAttrs {
        default_status: None,
        default_action: ActionSet::SEND,
    };
    for (key, value) in attrs {
        match key.as_str() {
            "defaultStatus" => root.default_status = Some(value.clone()),
            "defaultAction" => root.default_action = ActionSet::parse_primary_only(value)?,
            _ => return Err(unknown(ROOT, key)),
        }
    }
    Ok(root)
}

fn parse_block(
    attrs: &[(String, String)],
    root_default: ActionSet,
) -> Result<BlockBuilder, RuleError> {
    let mut oid = None;
    let mut content = None;
    let mut connection_state = None;
    let mut default_action = root_default;

    for (key, value) in attrs {
        match key.as_str() {
            "oid" => oid = Some(value.clone()),
            "content" => content = Some(value.clone()),
            "defaultAction" => default_action = value.parse()?,
            "connectionState" => connection_state = Some(value.parse()?),
            _ => return Err(unknown(ON_STATUS, key)),
        }
    }

    Ok(BlockBuilder {
        oid: oid.ok_or_else(|| missing(ON_STATUS, "oid"))?,
        content: content.ok_or_else(|| missing(ON_STATUS, "content"))?,
        connection_state,
        default_action,
        overrides: [None; Priority::COUNT],
    })
}

fn parse_action(attrs: &[(String, String)]) -> Result<(ActionSet, PriorityRange), RuleError> {
    let mut action = None;
    let mut range = None;
    for (key, value) in attrs {
        match key.as_str() {
            "do" => action = Some(value.parse::<ActionSet>()?),
            "ifPriority" => range = Some(value.parse::<PriorityRange>()?),
            _ => return Err(unknown(ACTION, key)),
        }
    }
    Ok((
        action.ok_or_else(|| missing(ACTION, "do"))?,
        range.ok_or_else(|| missing(ACTION, "ifPriority"))?,
    ))
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
