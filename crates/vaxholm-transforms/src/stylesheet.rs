#![forbid(unsafe_code)]

//! Minimal XSLT 1.0 subset for transform stylesheets.
//!
//! Only supports the constructs that show up in signature/encryption
//! transform stylesheets: `xsl:template` with simple match patterns
//! (`/`, `*`, `node()`, `text()`, `@*`, element names, unions),
//! `xsl:apply-templates`, `xsl:value-of`, `xsl:copy`, literal result
//! elements, and the `xml`/`text` output methods.

use roxmltree::Document;
use vaxholm_core::{ns, Error, Result};
use vaxholm_xml::{collect_text, parsing_options, qualified_name};

/// Declared output method of a stylesheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMethod {
    Xml,
    Text,
}

/// A compiled stylesheet.
#[derive(Debug)]
pub struct Stylesheet {
    templates: Vec<Template>,
    output: OutputMethod,
}

#[derive(Debug)]
struct Template {
    patterns: Vec<Pattern>,
    body: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Root,
    AnyElement,
    AnyNode,
    Text,
    AnyAttribute,
    Name(String),
}

impl Pattern {
    /// Relative specificity, used to pick among several matching templates.
    fn priority(&self) -> u8 {
        match self {
            Pattern::Name(_) | Pattern::Root => 3,
            Pattern::Text | Pattern::AnyAttribute => 2,
            Pattern::AnyElement => 1,
            Pattern::AnyNode => 0,
        }
    }
}

#[derive(Debug, Clone)]
enum Select {
    /// `.`
    Current,
    /// `node()` — child elements and text
    Children,
    /// `*` — child elements only
    ChildElements,
    /// `@*`
    Attrs,
    /// `@*|node()`
    AttrsAndChildren,
    /// child element by name
    ChildName(String),
    /// `@name`
    AttrName(String),
}

#[derive(Debug)]
enum Instruction {
    Literal {
        name: String,
        attrs: Vec<(String, String)>,
        children: Vec<Instruction>,
    },
    Text(String),
    ApplyTemplates {
        select: Option<Select>,
    },
    ValueOf {
        select: Select,
    },
    Copy {
        body: Vec<Instruction>,
    },
}

impl Stylesheet {
    /// Parse and compile a stylesheet document.
    pub fn compile(xml: &str) -> Result<Self> {
        let doc = Document::parse_with_options(xml, parsing_options())
            .map_err(|e| Error::XmlFailed(format!("stylesheet: {e}")))?;
        let root = doc.root_element();
        let local = root.tag_name().name();
        if root.tag_name().namespace() != Some(ns::XSLT)
            || (local != "stylesheet" && local != "transform")
        {
            return Err(Error::XsltFailed(format!(
                "root element {local} is not a stylesheet"
            )));
        }

        let mut templates = Vec::new();
        let mut output = OutputMethod::Xml;
        for child in root.children() {
            if !child.is_element() || child.tag_name().namespace() != Some(ns::XSLT) {
                continue;
            }
            match child.tag_name().name() {
                "output" => {
                    if child.attribute("method") == Some("text") {
                        output = OutputMethod::Text;
                    }
                }
                "template" => {
                    // named templates without a match pattern are not used
                    let Some(pattern_text) = child.attribute("match") else {
                        continue;
                    };
                    templates.push(Template {
                        patterns: parse_patterns(pattern_text)?,
                        body: compile_body(xml, child)?,
                    });
                }
                _ => {} // strip-space and friends are accepted and ignored
            }
        }
        Ok(Self { templates, output })
    }

    /// The stylesheet's declared output method.
    pub fn output_method(&self) -> OutputMethod {
        self.output
    }

    /// Apply the stylesheet to a document, serializing per the declared
    /// output method.
    pub fn apply(&self, input_xml: &str) -> Result<Vec<u8>> {
        let doc = Document::parse_with_options(input_xml, parsing_options())
            .map_err(|e| Error::XmlFailed(format!("XSLT input: {e}")))?;
        let mut out = Vec::new();
        self.apply_templates(input_xml, XNode::Doc(doc.root()), &mut out);

        let mut rendered = String::new();
        match self.output {
            OutputMethod::Xml => {
                for item in &out {
                    render_xml(item, &mut rendered);
                }
            }
            OutputMethod::Text => {
                for item in &out {
                    render_text(item, &mut rendered);
                }
            }
        }
        Ok(rendered.into_bytes())
    }

    fn apply_templates(&self, xml: &str, node: XNode<'_, '_>, out: &mut Vec<Out>) {
        let best = self
            .templates
            .iter()
            .enumerate()
            .filter_map(|(i, t)| {
                t.patterns
                    .iter()
                    .filter(|p| pattern_matches(p, node))
                    .map(Pattern::priority)
                    .max()
                    .map(|prio| (prio, i, t))
            })
            .max_by_key(|&(prio, i, _)| (prio, i));

        match best {
            Some((_, _, template)) => self.exec_body(xml, &template.body, node, out),
            None => self.builtin_rule(xml, node, out),
        }
    }

    /// Built-in template rules: recurse through elements, copy text and
    /// attribute values through.
    fn builtin_rule(&self, xml: &str, node: XNode<'_, '_>, out: &mut Vec<Out>) {
        match node {
            XNode::Doc(n) | XNode::Elem(n) => {
                for child in n.children() {
                    if child.is_element() {
                        self.apply_templates(xml, XNode::Elem(child), out);
                    } else if child.is_text() {
                        self.apply_templates(xml, XNode::Text(child), out);
                    }
                }
            }
            XNode::Text(n) => out.push(Out::Text(n.text().unwrap_or("").to_owned())),
            XNode::Attr(n, idx) => {
                if let Some(attr) = n.attributes().nth(idx) {
                    out.push(Out::Text(attr.value().to_owned()));
                }
            }
        }
    }

    fn exec_body(
        &self,
        xml: &str,
        body: &[Instruction],
        current: XNode<'_, '_>,
        out: &mut Vec<Out>,
    ) {
        for instruction in body {
            match instruction {
                Instruction::Text(s) => out.push(Out::Text(s.clone())),
                Instruction::Literal {
                    name,
                    attrs,
                    children,
                } => {
                    let mut inner = Vec::new();
                    self.exec_body(xml, children, current, &mut inner);
                    out.push(make_element(name.clone(), attrs.clone(), inner));
                }
                Instruction::ApplyTemplates { select } => {
                    for selected in select_nodes(select.as_ref(), current) {
                        self.apply_templates(xml, selected, out);
                    }
                }
                Instruction::ValueOf { select } => {
                    let value = select_nodes(Some(select), current)
                        .first()
                        .map(|n| string_value(*n))
                        .unwrap_or_default();
                    out.push(Out::Text(value));
                }
                Instruction::Copy { body } => match current {
                    XNode::Elem(n) => {
                        let mut inner = Vec::new();
                        self.exec_body(xml, body, current, &mut inner);
                        out.push(make_element(
                            qualified_name(xml, n).to_owned(),
                            Vec::new(),
                            inner,
                        ));
                    }
                    XNode::Text(n) => out.push(Out::Text(n.text().unwrap_or("").to_owned())),
                    XNode::Attr(n, idx) => {
                        if let Some(attr) = n.attributes().nth(idx) {
                            out.push(Out::Attr(attr.name().to_owned(), attr.value().to_owned()));
                        }
                    }
                    XNode::Doc(_) => self.exec_body(xml, body, current, out),
                },
            }
        }
    }
}

// ── Node abstraction ─────────────────────────────────────────────────

/// The current node during template application.  Attributes are
/// addressed as (parent element, attribute index) because they are not
/// nodes in roxmltree.
#[derive(Clone, Copy)]
enum XNode<'a, 'input> {
    Doc(roxmltree::Node<'a, 'input>),
    Elem(roxmltree::Node<'a, 'input>),
    Text(roxmltree::Node<'a, 'input>),
    Attr(roxmltree::Node<'a, 'input>, usize),
}

fn pattern_matches(pattern: &Pattern, node: XNode<'_, '_>) -> bool {
    match (pattern, node) {
        (Pattern::Root, XNode::Doc(_)) => true,
        (Pattern::AnyElement, XNode::Elem(_)) => true,
        (Pattern::AnyNode, XNode::Elem(_) | XNode::Text(_)) => true,
        (Pattern::Text, XNode::Text(_)) => true,
        (Pattern::AnyAttribute, XNode::Attr(..)) => true,
        (Pattern::Name(name), XNode::Elem(n)) => n.tag_name().name() == name,
        _ => false,
    }
}

fn select_nodes<'a, 'input>(
    select: Option<&Select>,
    current: XNode<'a, 'input>,
) -> Vec<XNode<'a, 'input>> {
    let elem = match current {
        XNode::Doc(n) | XNode::Elem(n) => Some(n),
        _ => None,
    };
    let children = |elements_only: bool| -> Vec<XNode<'a, 'input>> {
        let mut nodes = Vec::new();
        if let Some(n) = elem {
            for child in n.children() {
                if child.is_element() {
                    nodes.push(XNode::Elem(child));
                } else if child.is_text() && !elements_only {
                    nodes.push(XNode::Text(child));
                }
            }
        }
        nodes
    };
    let attrs = || -> Vec<XNode<'a, 'input>> {
        match current {
            XNode::Elem(n) => (0..n.attributes().count())
                .map(|i| XNode::Attr(n, i))
                .collect(),
            _ => Vec::new(),
        }
    };

    match select {
        None | Some(Select::Children) => children(false),
        Some(Select::ChildElements) => children(true),
        Some(Select::Current) => vec![current],
        Some(Select::Attrs) => attrs(),
        Some(Select::AttrsAndChildren) => {
            let mut nodes = attrs();
            nodes.extend(children(false));
            nodes
        }
        Some(Select::ChildName(name)) => children(true)
            .into_iter()
            .filter(|n| matches!(n, XNode::Elem(e) if e.tag_name().name() == name))
            .collect(),
        Some(Select::AttrName(name)) => match current {
            XNode::Elem(n) => n
                .attributes()
                .position(|a| a.name() == name)
                .map(|i| vec![XNode::Attr(n, i)])
                .unwrap_or_default(),
            _ => Vec::new(),
        },
    }
}

fn string_value(node: XNode<'_, '_>) -> String {
    match node {
        XNode::Doc(n) | XNode::Elem(n) => collect_text(n),
        XNode::Text(n) => n.text().unwrap_or("").to_owned(),
        XNode::Attr(n, idx) => n
            .attributes()
            .nth(idx)
            .map(|a| a.value().to_owned())
            .unwrap_or_default(),
    }
}

// ── Compilation ──────────────────────────────────────────────────────

fn parse_patterns(text: &str) -> Result<Vec<Pattern>> {
    text.split('|')
        .map(|part| {
            let part = part.trim();
            Ok(match part {
                "/" => Pattern::Root,
                "*" => Pattern::AnyElement,
                "node()" => Pattern::AnyNode,
                "text()" => Pattern::Text,
                "@*" => Pattern::AnyAttribute,
                name if is_name_test(name) => {
                    Pattern::Name(local_part(name).to_owned())
                }
                other => {
                    return Err(Error::XsltFailed(format!(
                        "unsupported match pattern: {other}"
                    )))
                }
            })
        })
        .collect()
}

fn parse_select(text: &str) -> Result<Select> {
    let text = text.trim();
    Ok(match text {
        "." => Select::Current,
        "node()" => Select::Children,
        "*" => Select::ChildElements,
        "@*" => Select::Attrs,
        "@*|node()" | "node()|@*" => Select::AttrsAndChildren,
        name if name.starts_with('@') && is_name_test(&name[1..]) => {
            Select::AttrName(local_part(&name[1..]).to_owned())
        }
        name if is_name_test(name) => Select::ChildName(local_part(name).to_owned()),
        other => {
            return Err(Error::XsltFailed(format!(
                "unsupported select expression: {other}"
            )))
        }
    })
}

fn is_name_test(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.' || c == ':')
}

fn local_part(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn compile_body(xml: &str, node: roxmltree::Node<'_, '_>) -> Result<Vec<Instruction>> {
    let mut body = Vec::new();
    for child in node.children() {
        if child.is_text() {
            let text = child.text().unwrap_or("");
            if !text.trim().is_empty() {
                body.push(Instruction::Text(text.to_owned()));
            }
            continue;
        }
        if !child.is_element() {
            continue;
        }
        if child.tag_name().namespace() == Some(ns::XSLT) {
            match child.tag_name().name() {
                "apply-templates" => {
                    let select = child.attribute("select").map(parse_select).transpose()?;
                    body.push(Instruction::ApplyTemplates { select });
                }
                "value-of" => {
                    let select_text = child.attribute("select").ok_or_else(|| {
                        Error::XsltFailed("value-of without select".into())
                    })?;
                    body.push(Instruction::ValueOf {
                        select: parse_select(select_text)?,
                    });
                }
                "copy" => {
                    body.push(Instruction::Copy {
                        body: compile_body(xml, child)?,
                    });
                }
                other => {
                    return Err(Error::XsltFailed(format!(
                        "unsupported instruction: xsl:{other}"
                    )))
                }
            }
        } else {
            body.push(Instruction::Literal {
                name: qualified_name(xml, child).to_owned(),
                attrs: child
                    .attributes()
                    .map(|a| (a.name().to_owned(), a.value().to_owned()))
                    .collect(),
                children: compile_body(xml, child)?,
            });
        }
    }
    Ok(body)
}

// ── Output tree ──────────────────────────────────────────────────────

enum Out {
    Element {
        name: String,
        attrs: Vec<(String, String)>,
        children: Vec<Out>,
    },
    Text(String),
    /// An attribute produced inside `xsl:copy`; lifted onto the enclosing
    /// element when the element is built.
    Attr(String, String),
}

/// Build an element, lifting produced attributes out of the child list.
fn make_element(name: String, mut attrs: Vec<(String, String)>, children: Vec<Out>) -> Out {
    let mut kept = Vec::new();
    for child in children {
        match child {
            Out::Attr(n, v) => attrs.push((n, v)),
            other => kept.push(other),
        }
    }
    Out::Element {
        name,
        attrs,
        children: kept,
    }
}

fn render_xml(out: &Out, dst: &mut String) {
    match out {
        Out::Text(t) => dst.push_str(&escape_text(t)),
        Out::Attr(..) => {} // attribute outside an element: dropped
        Out::Element {
            name,
            attrs,
            children,
        } => {
            dst.push('<');
            dst.push_str(name);
            for (n, v) in attrs {
                dst.push(' ');
                dst.push_str(n);
                dst.push_str("=\"");
                dst.push_str(&escape_attr(v));
                dst.push('"');
            }
            if children.is_empty() {
                dst.push_str("/>");
            } else {
                dst.push('>');
                for child in children {
                    render_xml(child, dst);
                }
                dst.push_str("</");
                dst.push_str(name);
                dst.push('>');
            }
        }
    }
}

fn render_text(out: &Out, dst: &mut String) {
    match out {
        Out::Text(t) => dst.push_str(t),
        Out::Attr(..) => {}
        Out::Element { children, .. } => {
            for child in children {
                render_text(child, dst);
            }
        }
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}
