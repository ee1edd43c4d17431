//! Classification vocabularies embedded in prompts and used to validate results
//!
//! Two vocabularies:
//! - Five green-technology categories (`GT1`..`GT5`)
//! - A three-level hydrogen technology tree (`H1`..`H4`, e.g. `H1.1.2`)
//!
//! The built-in tree can be replaced by a TOML file:
//!
//! ```toml
//! [[tech]]
//! code = "H1"
//! name_zh = "制氢"
//! name_en = "Hydrogen Production"
//!
//! [[tech]]
//! code = "H1.1"
//! name_zh = "电解水制氢"
//! name_en = "Water Electrolysis"
//! ```
//!
//! `[[green]]` entries may be supplied the same way; omitted sections keep
//! the built-in content.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A green-technology category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreenCategory {
    pub code: String,
    pub category_type: String,
    pub definition: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// A node of the technology tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechNode {
    pub code: String,
    pub name_zh: String,
    #[serde(default)]
    pub name_en: String,
}

impl TechNode {
    /// Depth in the tree, derived from the dotted code (`H1` = 1, `H1.1.2` = 3)
    pub fn level(&self) -> u8 {
        (self.code.matches('.').count() + 1) as u8
    }

    /// Code of the parent node, if any
    pub fn parent_code(&self) -> Option<&str> {
        self.code.rfind('.').map(|idx| &self.code[..idx])
    }
}

#[derive(Debug, Default, Deserialize)]
struct TaxonomyFile {
    green: Option<Vec<GreenCategory>>,
    tech: Option<Vec<TechNode>>,
}

/// Green categories plus the technology tree
#[derive(Debug, Clone, PartialEq)]
pub struct Taxonomy {
    green: Vec<GreenCategory>,
    tech: Vec<TechNode>,
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Taxonomy {
    pub fn builtin() -> Self {
        let green = GREEN_CATEGORIES
            .iter()
            .map(|(code, category_type, definition, examples)| GreenCategory {
                code: code.to_string(),
                category_type: category_type.to_string(),
                definition: definition.to_string(),
                examples: examples.iter().map(|e| e.to_string()).collect(),
            })
            .collect();

        let tech = TECH_TREE
            .iter()
            .map(|(code, name_zh, name_en)| TechNode {
                code: code.to_string(),
                name_zh: name_zh.to_string(),
                name_en: name_en.to_string(),
            })
            .collect();

        Self { green, tech }
    }

    /// Load a taxonomy file; sections it omits fall back to the built-in content
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: TaxonomyFile = toml::from_str(contents)
            .map_err(|e| Error::ConfigError(format!("Invalid taxonomy file: {}", e)))?;

        let builtin = Self::builtin();
        let taxonomy = Self {
            green: file.green.unwrap_or(builtin.green),
            tech: file.tech.unwrap_or(builtin.tech),
        };
        taxonomy.validate()?;
        Ok(taxonomy)
    }

    fn validate(&self) -> Result<()> {
        if self.green.is_empty() || self.tech.is_empty() {
            return Err(Error::ConfigError(
                "Taxonomy must define at least one green category and one tech node".to_string(),
            ));
        }
        for node in &self.tech {
            if let Some(parent) = node.parent_code() {
                if self.tech_node(parent).is_none() {
                    return Err(Error::ConfigError(format!(
                        "Tech node {} has no parent {}",
                        node.code, parent
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn green_categories(&self) -> &[GreenCategory] {
        &self.green
    }

    pub fn tech_nodes(&self) -> &[TechNode] {
        &self.tech
    }

    pub fn green_category(&self, code: &str) -> Option<&GreenCategory> {
        self.green.iter().find(|c| c.code == code)
    }

    pub fn tech_node(&self, code: &str) -> Option<&TechNode> {
        self.tech.iter().find(|n| n.code == code)
    }

    /// Green categories rendered for a prompt
    pub fn green_prompt_text(&self) -> String {
        self.green
            .iter()
            .map(|c| {
                let examples = c
                    .examples
                    .iter()
                    .map(|e| format!("      • {}", e))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!(
                    "**{}** (代码: {})\n  定义: {}\n  典型示例:\n{}",
                    c.category_type, c.code, c.definition, examples
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Technology tree rendered for a prompt, one node per line
    pub fn tech_tree_text(&self) -> String {
        let mut lines = vec!["## 氢能技术领域分类体系".to_string()];
        for node in &self.tech {
            match node.level() {
                1 => {
                    lines.push(String::new());
                    lines.push(format!("### {} {} ({})", node.code, node.name_zh, node.name_en));
                }
                2 => lines.push(format!("  **{}** {} ({})", node.code, node.name_zh, node.name_en)),
                _ => lines.push(format!("    - {}: {}", node.code, node.name_zh)),
            }
        }
        lines.join("\n")
    }
}

type GreenRow = (&'static str, &'static str, &'static str, &'static [&'static str]);

const GREEN_CATEGORIES: &[GreenRow] = &[
    (
        "GT1",
        "零碳使能型",
        "直接支撑绿氢经济的核心技术，显著提升可再生能源制氢的可行性，降低绿氢成本、能耗或间歇性障碍，全流程近零碳排放。",
        &["PEM电解槽优化", "风光氢离网耦合控制系统", "低能耗LOHC脱氢技术", "绿氢燃料电池重卡"],
    ),
    (
        "GT2",
        "低碳过渡型",
        "支持蓝氢或显著减碳的过渡性技术，依赖碳捕集与封存实现大幅减排，或用于替代高碳终端应用。",
        &["SMR+高效CCS系统", "蓝氢专用输氢管道", "氢基直接还原铁炼钢工艺"],
    ),
    (
        "GT3",
        "绿氢兼容型",
        "技术本身不产生碳排放，可用于绿氢也可用于灰氢，不锁定高碳路径，但也不专属促进零碳转型。",
        &["高压IV型储氢瓶", "标准加氢站设备", "通用质子交换膜", "氢气压缩机"],
    ),
    (
        "GT4",
        "碳锁定型",
        "强化高碳制氢路径，仅优化灰氢或棕氢工艺，未集成CCS或可再生电力接口，阻碍系统脱碳。",
        &["无CCS的SMR催化剂效率提升", "炼油厂专用灰氢提纯装置", "基于天然气管网的灰氢输配系统"],
    ),
    (
        "GT5",
        "中性模糊型",
        "无法明确判断其绿色贡献的技术，通常为通用基础部件、安全装置或未限定应用场景与能源来源的模块。",
        &["氢气泄漏传感器", "密封材料改进", "未限定电源类型的电解电源管理模块", "通用阀门或连接件"],
    ),
];

const TECH_TREE: &[(&str, &str, &str)] = &[
    ("H1", "制氢(上游)", "Hydrogen Production"),
    ("H1.1", "电解水制氢", "Water Electrolysis"),
    ("H1.1.1", "碱性电解(AEL)", "Alkaline Electrolysis"),
    ("H1.1.2", "质子交换膜电解(PEMEL)", "PEM Electrolysis"),
    ("H1.1.3", "固体氧化物电解(SOEC)", "Solid Oxide Electrolysis"),
    ("H1.1.4", "阴离子交换膜电解(AEMEL)", "Anion Exchange Membrane Electrolysis"),
    ("H1.1.5", "其他电解水制氢技术", "Other Water Electrolysis"),
    ("H1.2", "化石能源制氢", "Fossil-based Reforming"),
    ("H1.2.1", "天然气重整(SMR)", "Steam Methane Reforming"),
    ("H1.2.2", "煤制氢(煤气化)", "Coal Gasification"),
    ("H1.2.3", "甲醇裂解制氢", "Methanol Reforming"),
    ("H1.2.4", "其他化石能源制氢技术", "Other Fossil-based Reforming"),
    ("H1.3", "可再生能源耦合制氢", "Renewable-integrated Production"),
    ("H1.3.1", "风光电制氢系统集成", "Wind-Solar-H2 Integration"),
    ("H1.3.2", "离网/微网制氢", "Off-grid/Microgrid Production"),
    ("H1.3.3", "电解槽与可再生能源协同控制", "Electrolyzer-Renewable Co-control"),
    ("H1.3.4", "其他可再生能源耦合制氢技术", "Other Renewable-integrated Production"),
    ("H1.4", "光/热/生物制氢", "Photo/Thermo/Bio Methods"),
    ("H1.4.1", "光催化/光电化学制氢", "Photocatalytic/Photoelectrochemical"),
    ("H1.4.2", "太阳能热化学循环制氢", "Solar Thermochemical Cycles"),
    ("H1.4.3", "生物质气化/发酵制氢", "Biomass Gasification/Fermentation"),
    ("H1.4.4", "其他光/热/生物制氢技术", "Other Alternative Methods"),
    ("H1.5", "其他制氢技术", "Other Hydrogen Production"),
    ("H2", "储运氢(中游)", "Hydrogen Storage & Transportation"),
    ("H2.1", "高压气态储运", "High-pressure Gaseous"),
    ("H2.1.1", "35 MPa 储氢容器", "35 MPa Containers"),
    ("H2.1.2", "70 MPa 储氢容器", "70 MPa Containers"),
    ("H2.1.3", "高压管束车/长管拖车", "Tube Trailers"),
    ("H2.1.4", "其他高压气态储运技术", "Other High-pressure Gaseous"),
    ("H2.2", "低温液态储运", "Cryogenic Liquid"),
    ("H2.2.1", "液氢储罐(车载/固定)", "Liquid H2 Tanks"),
    ("H2.2.2", "液氢加注与转注技术", "Liquid H2 Transfer"),
    ("H2.2.3", "液氢蒸发损失控制", "Boil-off Control"),
    ("H2.2.4", "其他低温液态储运技术", "Other Cryogenic Liquid"),
    ("H2.3", "固态/材料储氢", "Solid-state Storage"),
    ("H2.3.1", "金属/合金氢化物", "Metal/Alloy Hydrides"),
    ("H2.3.2", "化学氢化物", "Chemical Hydrides"),
    ("H2.3.3", "多孔材料吸附储氢", "Porous Materials"),
    ("H2.3.4", "其他固态/材料储氢技术", "Other Solid-state Storage"),
    ("H2.4", "有机载体储运(LOHC等)", "Liquid Organic Carriers"),
    ("H2.4.1", "甲苯/甲基环己烷体系", "Toluene/Methylcyclohexane"),
    ("H2.4.2", "N-乙基咔唑等杂环体系", "N-Ethylcarbazole Systems"),
    ("H2.4.3", "载体加氢/脱氢催化剂", "Hydrogenation/Dehydrogenation Catalysts"),
    ("H2.4.4", "其他有机载体储运技术", "Other Organic Carriers"),
    ("H2.5", "氢输配基础设施", "Distribution Infrastructure"),
    ("H2.5.1", "氢气管道(纯氢/掺氢)", "H2 Pipelines"),
    ("H2.5.2", "加氢站关键设备", "Refueling Station Equipment"),
    ("H2.5.3", "氢气压缩与纯化", "Compression & Purification"),
    ("H2.5.4", "其他氢输配基础设施技术", "Other Distribution Infrastructure"),
    ("H2.6", "其他储运氢技术", "Other Storage & Transportation"),
    ("H3", "用氢(下游)", "Hydrogen Utilization"),
    ("H3.1", "燃料电池", "Fuel Cells"),
    ("H3.1.1", "质子交换膜燃料电池(PEMFC)", "PEM Fuel Cell"),
    ("H3.1.2", "固体氧化物燃料电池(SOFC)", "Solid Oxide Fuel Cell"),
    ("H3.1.3", "碱性燃料电池(AFC)等其他类型", "Alkaline Fuel Cell & Others"),
    ("H3.1.4", "其他燃料电池技术", "Other Fuel Cells"),
    ("H3.2", "氢能交通", "Hydrogen Mobility"),
    ("H3.2.1", "氢燃料电池汽车", "Fuel Cell Vehicles"),
    ("H3.2.2", "氢动力轨道交通/船舶/航空", "H2 Rail/Marine/Aviation"),
    ("H3.2.3", "车载供氢系统", "On-board Supply Systems"),
    ("H3.2.4", "其他氢能交通技术", "Other Hydrogen Mobility"),
    ("H3.3", "工业用氢", "Industrial Applications"),
    ("H3.3.1", "氢冶金(直接还原铁等)", "H2 Metallurgy"),
    ("H3.3.2", "石化/合成氨/甲醇用氢", "Petrochemical/Ammonia/Methanol"),
    ("H3.3.3", "电子级高纯氢应用", "Electronics-grade H2"),
    ("H3.3.4", "其他工业用氢技术", "Other Industrial Applications"),
    ("H3.4", "氢能发电与储能", "Power Generation & Grid Storage"),
    ("H3.4.1", "氢燃气轮机发电", "H2 Gas Turbines"),
    ("H3.4.2", "氢-电双向储能系统", "Bidirectional H2-Electricity Storage"),
    ("H3.4.3", "氢参与电网调峰", "Grid Balancing"),
    ("H3.4.4", "其他氢能发电与储能技术", "Other Power & Storage"),
    ("H3.5", "氢基燃料合成", "Hydrogen-derived Fuels"),
    ("H3.5.1", "绿氨合成", "Green Ammonia"),
    ("H3.5.2", "电子甲醇/e-Fuels", "e-Methanol/e-Fuels"),
    ("H3.5.3", "合成航空煤油(e-Kerosene)", "e-Kerosene"),
    ("H3.5.4", "其他氢基燃料合成技术", "Other Hydrogen-derived Fuels"),
    ("H3.6", "其他用氢技术", "Other Hydrogen Utilization"),
    ("H4", "其他(不在制、储运、用之中)", "Other"),
];
