use crate::error::{read_file, Error, Result};
use crate::kinematics::{exp_map_to_quat, quat_from_axis_angle};
use crate::types::*;
use cgmath::{InnerSpace, One};
use roxmltree::Node;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointType {
    /// the first body, driven by the root position/rotation of a frame
    Root,
    /// welded to its parent, no dofs
    Fixed,
    /// one rotation angle around an axis
    Hinge,
    /// three dofs stored as an exponential map
    Spherical,
}

impl JointType {
    pub fn dof_size(&self) -> usize {
        match self {
            JointType::Root | JointType::Fixed => 0,
            JointType::Hinge => 1,
            JointType::Spherical => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Body {
    pub name: String,
    pub index: Index,
    pub parent_index: ParentIndex,
    pub children: Vec<Index>,
    /// offset from the parent body, in the parent frame
    pub local_translation: Position,
    pub local_rotation: Quaternion,
    pub joint_type: JointType,
    /// rotation axis of hinge joints
    pub joint_axis: Position,
    /// first entry of this body's dofs inside the joint part of a frame
    pub dof_offset: Index,
}

#[derive(Debug, Clone)]
pub struct CharacterModel {
    bodies: Vec<Body>,
    num_dofs: usize,
}

/////////////////////////////////////////////////////////////////////////////////////////////////

/// Joint attributes inherited through `<default>` classes.
#[derive(Debug, Clone, Default)]
struct JointDefaults {
    joint_type: Option<String>,
    axis: Option<String>,
}

impl JointDefaults {
    fn merged(&self, joint: Node) -> JointDefaults {
        JointDefaults {
            joint_type: joint
                .attribute("type")
                .map(str::to_string)
                .or_else(|| self.joint_type.clone()),
            axis: joint
                .attribute("axis")
                .map(str::to_string)
                .or_else(|| self.axis.clone()),
        }
    }
}

const MAIN_CLASS: &str = "main";

fn collect_defaults(node: Node, inherited: &JointDefaults, out: &mut HashMap<String, JointDefaults>) {
    let class = node.attribute("class").unwrap_or(MAIN_CLASS).to_string();
    let mut defaults = inherited.clone();
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "joint" {
            defaults = defaults.merged(child);
        }
    }
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "default" {
            collect_defaults(child, &defaults, out);
        }
    }
    out.insert(class, defaults);
}

fn parse_floats(text: &str, what: &str) -> Result<Vec<f64>> {
    text.split_whitespace()
        .map(|s| {
            s.parse::<f64>()
                .map_err(|_| Error::Character(format!("invalid number '{s}' in {what}")))
        })
        .collect()
}

fn parse_vec3(text: &str, what: &str) -> Result<Position> {
    let values = parse_floats(text, what)?;
    if values.len() != 3 {
        return Err(Error::Character(format!(
            "{what} needs 3 numbers, got '{text}'"
        )));
    }
    Ok(position_from_slice(&values))
}

/// MJCF quaternions are written `w x y z`.
fn parse_quat(text: &str, what: &str) -> Result<Quaternion> {
    let values = parse_floats(text, what)?;
    if values.len() != 4 {
        return Err(Error::Character(format!(
            "{what} needs 4 numbers, got '{text}'"
        )));
    }
    let q = Quaternion::new(values[0], values[1], values[2], values[3]);
    if q.magnitude() < 1e-12 {
        return Err(Error::Character(format!("{what} is a zero quaternion")));
    }
    Ok(q.normalize())
}

fn element_children<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == tag)
}

fn find_worldbody<'a, 'input>(doc: &'a roxmltree::Document<'input>) -> Result<Node<'a, 'input>> {
    element_children(doc.root_element(), "worldbody")
        .next()
        .ok_or_else(|| Error::Character("no <worldbody> element".to_string()))
}

/////////////////////////////////////////////////////////////////////////////////////////////////

struct ModelBuilder {
    defaults: HashMap<String, JointDefaults>,
    bodies: Vec<Body>,
    num_dofs: usize,
}

impl ModelBuilder {
    fn joint_defaults(&self, class: &str) -> JointDefaults {
        self.defaults
            .get(class)
            .or_else(|| self.defaults.get(MAIN_CLASS))
            .cloned()
            .unwrap_or_default()
    }

    /// Walk a body and its children depth first, parents before children.
    fn add_body(&mut self, node: Node, parent_index: ParentIndex, class: &str) -> Result<()> {
        let index = self.bodies.len();
        let name = node
            .attribute("name")
            .map(str::to_string)
            .unwrap_or_else(|| format!("body_{index}"));
        let class = node.attribute("childclass").unwrap_or(class);

        let local_translation = match node.attribute("pos") {
            Some(pos) => parse_vec3(pos, &format!("pos of body '{name}'"))?,
            None => Position::new(0.0, 0.0, 0.0),
        };
        if let Some(attr) = ["euler", "axisangle", "xyaxes", "zaxis"]
            .into_iter()
            .find(|attr| node.attribute(*attr).is_some())
        {
            return Err(Error::Character(format!(
                "body '{name}' sets its orientation with '{attr}', only 'quat' is supported"
            )));
        }
        let local_rotation = match node.attribute("quat") {
            Some(quat) => parse_quat(quat, &format!("quat of body '{name}'"))?,
            None => Quaternion::one(),
        };

        //// resolve the joints of this body
        let has_free_joint = element_children(node, "freejoint").next().is_some();
        let mut hinge_axes = Vec::new();
        let mut num_ball = 0;
        let mut other_types = Vec::new();
        for joint in element_children(node, "joint") {
            let joint_class = joint.attribute("class").unwrap_or(class);
            let attrs = self.joint_defaults(joint_class).merged(joint);
            match attrs.joint_type.as_deref().unwrap_or("hinge") {
                "hinge" => {
                    let axis = match attrs.axis.as_deref() {
                        Some(axis) => parse_vec3(axis, &format!("axis of a joint in '{name}'"))?,
                        None => Position::unit_z(),
                    };
                    if axis.magnitude() < 1e-12 {
                        return Err(Error::Character(format!(
                            "hinge joint in body '{name}' has a zero axis"
                        )));
                    }
                    hinge_axes.push(axis.normalize());
                }
                "ball" => num_ball += 1,
                "free" => other_types.push("free".to_string()),
                other => other_types.push(other.to_string()),
            }
        }

        let is_root = parent_index == -1;
        let joint_type = if is_root {
            let only_free = other_types.iter().all(|t| t == "free");
            if !(only_free && hinge_axes.is_empty() && num_ball == 0) {
                return Err(Error::Character(format!(
                    "root body '{name}' may only have a free joint"
                )));
            }
            JointType::Root
        } else if has_free_joint || !other_types.is_empty() {
            return Err(Error::Character(format!(
                "body '{name}' has unsupported joints {:?}",
                other_types
            )));
        } else {
            match (hinge_axes.len(), num_ball) {
                (0, 0) => JointType::Fixed,
                (1, 0) => JointType::Hinge,
                (0, 1) | (3, 0) => JointType::Spherical,
                (hinges, balls) => {
                    return Err(Error::Character(format!(
                        "body '{name}' has {hinges} hinge and {balls} ball joints, expected one hinge, one ball or three hinges"
                    )))
                }
            }
        };

        let joint_axis = match joint_type {
            JointType::Hinge => hinge_axes[0],
            _ => Position::unit_z(),
        };

        self.bodies.push(Body {
            name,
            index,
            parent_index,
            children: Vec::new(),
            local_translation,
            local_rotation,
            joint_type,
            joint_axis,
            dof_offset: self.num_dofs,
        });
        self.num_dofs += joint_type.dof_size();
        if parent_index >= 0 {
            self.bodies[parent_index as Index].children.push(index);
        }

        for child in element_children(node, "body") {
            self.add_body(child, index as ParentIndex, class)?;
        }
        Ok(())
    }
}

impl CharacterModel {
    /// Parse an MJCF document.
    pub fn from_xml_str(xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc.root_element();

        let mut defaults = HashMap::new();
        for default in element_children(root, "default") {
            collect_defaults(default, &JointDefaults::default(), &mut defaults);
        }

        let worldbody = find_worldbody(&doc)?;
        let mut top_level = element_children(worldbody, "body");
        let root_body = top_level
            .next()
            .ok_or_else(|| Error::Character("<worldbody> has no bodies".to_string()))?;
        if top_level.next().is_some() {
            return Err(Error::Character(
                "<worldbody> has more than one root body".to_string(),
            ));
        }

        let mut builder = ModelBuilder {
            defaults,
            bodies: Vec::new(),
            num_dofs: 0,
        };
        builder.add_body(root_body, -1, MAIN_CLASS)?;
        Ok(CharacterModel {
            bodies: builder.bodies,
            num_dofs: builder.num_dofs,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = read_file(path)?;
        let xml = String::from_utf8(data)
            .map_err(|_| Error::Character(format!("{} is not utf-8", path.display())))?;
        CharacterModel::from_xml_str(&xml).map_err(|err| match err {
            Error::Character(msg) => Error::Character(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    //// ACCESSORS

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn num_bodies(&self) -> usize {
        self.bodies.len()
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn body_names(&self) -> Vec<String> {
        self.bodies.iter().map(|b| b.name.clone()).collect()
    }

    pub fn parent_id(&self, body: Index) -> ParentIndex {
        self.bodies[body].parent_index
    }

    pub fn parent_indices(&self) -> Vec<ParentIndex> {
        self.bodies.iter().map(|b| b.parent_index).collect()
    }

    pub fn find_body_by_name(&self, name: &str) -> Option<&Body> {
        self.bodies.iter().find(|b| b.name == name)
    }

    /// Turn the joint part of a frame into one local rotation per body
    /// (identity for the root and fixed bodies).
    pub fn dof_to_rot(&self, dofs: &[f64]) -> Result<Vec<Quaternion>> {
        if dofs.len() != self.num_dofs {
            return Err(Error::Character(format!(
                "expected {} joint dofs, got {}",
                self.num_dofs,
                dofs.len()
            )));
        }
        let rotations = self
            .bodies
            .iter()
            .map(|body| {
                let d = &dofs[body.dof_offset..body.dof_offset + body.joint_type.dof_size()];
                match body.joint_type {
                    JointType::Root | JointType::Fixed => Quaternion::one(),
                    JointType::Hinge => quat_from_axis_angle(body.joint_axis, d[0]),
                    JointType::Spherical => exp_map_to_quat(position_from_slice(d)),
                }
            })
            .collect();
        Ok(rotations)
    }
}

//////////////////////////////////////////////////////////////// DESCRIPTION ///////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JointDescription {
    pub name: Option<String>,
    pub body: Option<String>,
    pub parent: Option<String>,
    pub axis: Vec<f64>,
    pub range: Vec<f64>,
    pub pos: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterDescription {
    pub character: String,
    pub joints: Vec<JointDescription>,
    pub num_joints: usize,
}

fn describe_body(node: Node, parent: Option<&str>, joints: &mut Vec<JointDescription>) -> Result<()> {
    let body_name = node.attribute("name");
    let pos = parse_floats(node.attribute("pos").unwrap_or("0 0 0"), "body pos")?;

    for joint in element_children(node, "joint") {
        joints.push(JointDescription {
            name: joint.attribute("name").map(str::to_string),
            body: body_name.map(str::to_string),
            parent: parent.map(str::to_string),
            axis: parse_floats(joint.attribute("axis").unwrap_or("1 0 0"), "joint axis")?,
            range: parse_floats(joint.attribute("range").unwrap_or("-180 180"), "joint range")?,
            pos: pos.clone(),
        });
    }
    for child in element_children(node, "body") {
        describe_body(child, body_name, joints)?;
    }
    Ok(())
}

/// Flat list of the `<joint>` elements of a character, in document order, with the body that
/// owns each joint and that body's parent.
pub fn describe_character_xml(character: &str, xml: &str) -> Result<CharacterDescription> {
    let doc = roxmltree::Document::parse(xml)?;
    let mut joints = Vec::new();
    if let Some(worldbody) = element_children(doc.root_element(), "worldbody").next() {
        for body in element_children(worldbody, "body") {
            describe_body(body, None, &mut joints)?;
        }
    }
    Ok(CharacterDescription {
        character: character.to_string(),
        num_joints: joints.len(),
        joints,
    })
}

/// `<asset_dir>/<name>/<name>.xml`
pub fn character_xml_path(asset_dir: &Path, name: &str) -> PathBuf {
    asset_dir.join(name).join(format!("{name}.xml"))
}

/////////////////////////////////////////////////////////////////////////////////////////////////
