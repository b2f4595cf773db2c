//! Call instruction documents (`<Response>`) understood by the vendor.
use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialTarget<'a> {
    Number(&'a str),
    Client(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    Dial {
        caller_id: Option<&'a str>,
        target: DialTarget<'a>,
    },
    Say(&'a str),
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Renders `<Response>` holding one instruction, optionally after an XML declaration.
pub fn render(instruction: Instruction<'_>, with_declaration: bool) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    if with_declaration {
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    }
    writer.write_event(Event::Start(BytesStart::new("Response")))?;
    match instruction {
        Instruction::Dial { caller_id, target } => {
            let mut dial = BytesStart::new("Dial");
            if let Some(caller_id) = caller_id {
                dial.push_attribute(("callerId", caller_id));
            }
            writer.write_event(Event::Start(dial))?;
            match target {
                DialTarget::Number(number) => write_text_element(&mut writer, "Number", number)?,
                DialTarget::Client(client) => write_text_element(&mut writer, "Client", client)?,
            }
            writer.write_event(Event::End(BytesEnd::new("Dial")))?;
        }
        Instruction::Say(text) => write_text_element(&mut writer, "Say", text)?,
    }
    writer.write_event(Event::End(BytesEnd::new("Response")))?;
    Ok(String::from_utf8(writer.into_inner().into_inner())?)
}
