//! Prompt builders, one per task kind

use crate::domain::{EntityItem, EntityType, PatentItem, ResultKind, WorkItem};
use crate::taxonomy::Taxonomy;

/// Build the user prompt for `kind` over `chunk`
///
/// Items of the wrong kind for the task are ignored.
pub fn build_prompt(kind: ResultKind, chunk: &[WorkItem], taxonomy: &Taxonomy) -> String {
    match kind {
        ResultKind::Green => green_prompt(&patents(chunk), taxonomy),
        ResultKind::Tech => tech_prompt(&patents(chunk), taxonomy),
        ResultKind::Location => location_prompt(&entities(chunk)),
    }
}

fn patents(chunk: &[WorkItem]) -> Vec<&PatentItem> {
    chunk
        .iter()
        .filter_map(|item| match item {
            WorkItem::Patent(p) => Some(p),
            WorkItem::Entity(_) => None,
        })
        .collect()
}

fn entities(chunk: &[WorkItem]) -> Vec<&EntityItem> {
    chunk
        .iter()
        .filter_map(|item| match item {
            WorkItem::Entity(e) => Some(e),
            WorkItem::Patent(_) => None,
        })
        .collect()
}

fn patent_blocks(patents: &[&PatentItem]) -> String {
    patents
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let mut block = format!(
                "### 专利{}\nID: {}\n标题: {}\n摘要: {}...\nIPC: {}",
                i + 1,
                p.patent_id,
                p.title,
                p.abstract_excerpt,
                p.ipc_main_class.as_deref().unwrap_or("未知"),
            );
            if let Some(hint) = &p.tech_domain_hint {
                block.push_str(&format!("\n来源领域提示: {}", hint));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn green_prompt(patents: &[&PatentItem], taxonomy: &Taxonomy) -> String {
    format!(
        r#"请对以下氢能专利进行绿色技术五分类。

{patents}

## 分类标准

{categories}

## 分析要点

1. 识别核心技术路径(电解制氢/化石能源制氢/储运/应用)
2. 判断能源来源依赖(可再生能源/化石能源/通用)
3. 评估碳排放特征(零碳/低碳/高碳/中性)
4. 确定是否锁定特定路径
5. 综合判断所属类别

## 输出格式

返回JSON数组,每个专利一个对象:
```json
[
  {{
    "patent_id": "专利ID",
    "category_code": "GT1",
    "category_type": "零碳使能型",
    "confidence": 0.9,
    "reasoning": "分类理由"
  }}
]
```

只返回JSON,不要其他内容。"#,
        patents = patent_blocks(patents),
        categories = taxonomy.green_prompt_text(),
    )
}

fn tech_prompt(patents: &[&PatentItem], taxonomy: &Taxonomy) -> String {
    format!(
        r#"请为以下氢能专利识别其所属的技术领域。

{patents}

## 技术领域分类体系

{tree}

## 分类原则

1. 尽可能识别到三级(L3)具体技术
2. 无法明确到三级时使用二级(L2)
3. 一级(L1)仅在无法判断具体技术时使用
4. 明确不属于制、储运、用任何一类的专利归入H4
5. 一个专利可以属于多个技术领域

## 输出格式

返回JSON数组,每个专利一个对象:
```json
[
  {{
    "patent_id": "专利ID",
    "tech_domains": [
      {{
        "code": "H1.1.2",
        "level": 3,
        "confidence": 0.95,
        "reasoning": "分类理由"
      }}
    ]
  }}
]
```

只返回JSON,不要其他内容。"#,
        patents = patent_blocks(patents),
        tree = taxonomy.tech_tree_text(),
    )
}

fn entity_type_label(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Company => "企业",
        EntityType::IndividualOrOther => "个人/其他",
    }
}

fn location_prompt(entities: &[&EntityItem]) -> String {
    let lines = entities
        .iter()
        .enumerate()
        .map(|(i, e)| {
            format!(
                "{}. {} (标准化名称: {}, 类型: {})",
                i + 1,
                e.display_name,
                e.normalized_name,
                entity_type_label(e.entity_type)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"请查询以下实体(公司/组织)的注册地址信息。这些都是氢能领域的相关实体。

{lines}

## 要求

1. 查询每个实体的官方注册地址
2. 返回标准化地址: 省份、城市、区县(如有)
3. 准确性优先: 查不到准确信息时confidence设为0,不要猜测

## 输出格式

返回JSON数组:
```json
[
  {{
    "normalized_name": "实体标准化名称",
    "province": "XX省/市/自治区",
    "city": "XX市",
    "district": "XX区/县",
    "confidence": 0.95,
    "source": "信息来源说明"
  }}
]
```

只返回JSON,不要其他内容。"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patent(id: &str, ipc: Option<&str>) -> WorkItem {
        WorkItem::Patent(PatentItem {
            patent_id: id.to_string(),
            title: format!("标题{}", id),
            abstract_excerpt: "一种质子交换膜电解槽".to_string(),
            ipc_main_class: ipc.map(str::to_string),
            tech_domain_hint: Some("H1".to_string()),
        })
    }

    #[test]
    fn test_green_prompt_lists_patents_and_categories() {
        let chunk = vec![patent("CN1", Some("C25B1/04")), patent("CN2", None)];
        let prompt = build_prompt(ResultKind::Green, &chunk, &Taxonomy::builtin());

        assert!(prompt.contains("### 专利1\nID: CN1"));
        assert!(prompt.contains("### 专利2\nID: CN2"));
        assert!(prompt.contains("IPC: C25B1/04"));
        assert!(prompt.contains("IPC: 未知"));
        assert!(prompt.contains("(代码: GT5)"));
        assert!(prompt.contains("\"category_code\": \"GT1\""));
    }

    #[test]
    fn test_tech_prompt_embeds_tree() {
        let prompt = build_prompt(ResultKind::Tech, &[patent("CN1", None)], &Taxonomy::builtin());
        assert!(prompt.contains("H1.1.2: 质子交换膜电解(PEMEL)"));
        assert!(prompt.contains("\"tech_domains\""));
        assert!(prompt.contains("来源领域提示: H1"));
    }

    #[test]
    fn test_location_prompt_lists_entities() {
        let chunk = vec![WorkItem::Entity(EntityItem {
            normalized_name: "亿华通".to_string(),
            display_name: "亿华通股份有限公司".to_string(),
            entity_type: EntityType::Company,
        })];
        let prompt = build_prompt(ResultKind::Location, &chunk, &Taxonomy::builtin());
        assert!(prompt.contains("1. 亿华通股份有限公司 (标准化名称: 亿华通, 类型: 企业)"));
        assert!(prompt.contains("\"normalized_name\""));
    }
}
