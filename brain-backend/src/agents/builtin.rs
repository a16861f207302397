//! Built-in agent profiles, used when no `agents.ron` is present

use super::registry::AgentProfile;
use std::collections::BTreeSet;

pub const DEFAULT_AGENT: &str = "personal_assistant";

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn profiles() -> Vec<AgentProfile> {
    vec![
        AgentProfile {
            agent_id: DEFAULT_AGENT.to_string(),
            name: "Personal Assistant".to_string(),
            persona: "a warm, proactive executive assistant who coordinates the other specialists \
                      and speaks for the whole team"
                .to_string(),
            instructions: "Keep answers concise. When combining results from several specialists, \
                           lead with the outcome and mention anything that failed."
                .to_string(),
            capability_tags: set(&[
                "calendar", "schedule", "meeting", "meetings", "appointment", "remind", "reminder",
                "todo", "task", "tasks",
            ]),
            allowed_tools: set(&["calendar", "task_management", "email", "memory"]),
            response_template: "{content}\n\n{actions}".to_string(),
            temperature: 0.3,
        },
        AgentProfile {
            agent_id: "filesystem_agent".to_string(),
            name: "Filesystem Agent".to_string(),
            persona: "a careful file manager that inspects and organises files on the user's machine"
                .to_string(),
            instructions: "Never delete anything unless explicitly asked. Report paths exactly."
                .to_string(),
            capability_tags: set(&["file", "files", "folder", "folders", "directory", "filesystem"]),
            allowed_tools: set(&["filesystem", "terminal"]),
            response_template: "{content}\n\n{actions}".to_string(),
            temperature: 0.1,
        },
        AgentProfile {
            agent_id: "dev_lead".to_string(),
            name: "Dev Lead".to_string(),
            persona: "a pragmatic engineering lead fluent in repositories, pipelines and infrastructure"
                .to_string(),
            instructions: "Prefer concrete issue numbers, branch names and commands.".to_string(),
            capability_tags: set(&[
                "github", "gitlab", "issue", "issues", "pull", "code", "deploy", "deployment",
                "docker", "kubernetes", "pipeline", "bug", "bugs",
            ]),
            allowed_tools: set(&[
                "github", "gitlab", "docker", "kubernetes", "ci_cd", "code_analysis", "monitoring",
            ]),
            response_template: "🛠️ {content}\n\n{actions}".to_string(),
            temperature: 0.2,
        },
        AgentProfile {
            agent_id: "communication_agent".to_string(),
            name: "Communication Agent".to_string(),
            persona: "a reliable messenger who drafts and sends notifications to people and groups"
                .to_string(),
            instructions: "Confirm who was contacted and through which channel.".to_string(),
            capability_tags: set(&["notify", "message", "send", "whatsapp", "email", "announce"]),
            allowed_tools: set(&["whatsapp", "email"]),
            response_template: "{content}\n\n{actions}".to_string(),
            temperature: 0.3,
        },
        AgentProfile {
            agent_id: "data_analyst".to_string(),
            name: "Data Analyst".to_string(),
            persona: "a precise analyst who answers with numbers, queries and short interpretations"
                .to_string(),
            instructions: "Show the query you ran and state assumptions.".to_string(),
            capability_tags: set(&[
                "data", "sql", "query", "bigquery", "analytics", "metrics", "report", "dashboard",
            ]),
            allowed_tools: set(&["bigquery", "sql_server", "database", "data_analysis", "reporting", "memory"]),
            response_template: "📊 Analysis\n\n{content}\n\n{actions}".to_string(),
            temperature: 0.1,
        },
        AgentProfile {
            agent_id: "operations_manager".to_string(),
            name: "Operations Manager".to_string(),
            persona: "an organised operations manager who tracks projects, budgets and vendors"
                .to_string(),
            instructions: "Summarise status as on-track, at-risk or blocked.".to_string(),
            capability_tags: set(&["project", "projects", "budget", "vendor", "vendors", "resources", "compliance"]),
            allowed_tools: set(&[
                "project_management", "resource_planning", "budgeting", "analytics",
                "compliance_tracking", "vendor_systems", "scheduling", "reporting",
            ]),
            response_template: "{content}\n\n{actions}".to_string(),
            temperature: 0.2,
        },
        AgentProfile {
            agent_id: "hr_director".to_string(),
            name: "HR Director".to_string(),
            persona: "an empathetic HR director handling hiring, reviews and employee records"
                .to_string(),
            instructions: "Treat employee data as confidential.".to_string(),
            capability_tags: set(&["hr", "hiring", "recruiting", "candidate", "candidates", "employee", "employees", "leave"]),
            allowed_tools: set(&[
                "hrms", "recruiting", "performance_tracking", "employee_database",
                "learning_management", "compliance_tracking",
            ]),
            response_template: "{content}\n\n{actions}".to_string(),
            temperature: 0.2,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_builtin_tags_do_not_collide() {
        let mut owners: BTreeMap<String, String> = BTreeMap::new();
        for profile in profiles() {
            for tag in &profile.capability_tags {
                if let Some(other) = owners.insert(tag.clone(), profile.agent_id.clone()) {
                    panic!("tag '{}' shared by {} and {}", tag, other, profile.agent_id);
                }
            }
        }
    }

    #[test]
    fn test_default_agent_is_builtin() {
        assert!(profiles().iter().any(|p| p.agent_id == DEFAULT_AGENT));
    }
}
