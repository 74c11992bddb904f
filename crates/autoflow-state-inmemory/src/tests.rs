use crate::InMemoryStateStoreProvider;
use autoflow_core::{
    ActionConfig, CoreError, DataPacket, Graph, OwnerId, Run, RunStatus, Step, StepError, StepId,
    TriggerEvent, Workflow, WorkflowId, WorkflowStatus,
};
use serde_json::json;

fn workflow(id: &str, owner: &str) -> Workflow {
    let mut graph = Graph::new();
    graph
        .add_step(Step::trigger("Form", "form_submitted").with_id("t"))
        .unwrap();
    graph
        .add_step(Step::action("Notify", ActionConfig::new("send_email")).with_id("a"))
        .unwrap();
    graph
        .add_connection(StepId::new("t"), StepId::new("a"))
        .unwrap();
    let mut workflow = Workflow::new(OwnerId::from(owner), id).with_id(id);
    workflow.replace_graph(graph);
    workflow
}

fn finished_run(workflow: &Workflow) -> Run {
    let order = workflow.graph.execution_order();
    let mut run = Run::new(
        workflow,
        &order,
        TriggerEvent::manual(workflow.id.clone(), DataPacket::new(json!({"name": "Ada"}))),
    );
    run.start().unwrap();
    run.succeed_step(&StepId::new("t"), DataPacket::new(json!({"name": "Ada"})))
        .unwrap();
    run.begin_step(&StepId::new("a"), 1).unwrap();
    run.fail_step(&StepId::new("a"), StepError::Timeout { after_ms: 250 })
        .unwrap();
    run.fail("Step a timed out").unwrap();
    run
}

#[tokio::test]
async fn test_workflow_repository() -> Result<(), CoreError> {
    let provider = InMemoryStateStoreProvider::new();
    let (workflow_repo, _) = provider.create_repositories();

    let first = workflow("wf-1", "alice");
    let mut second = workflow("wf-2", "bob");
    second.status = WorkflowStatus::Active;
    workflow_repo.save(&first).await?;
    workflow_repo.save(&second).await?;

    let found = workflow_repo.find_by_id(&first.id).await?;
    assert_eq!(found, Some(first.clone()));
    assert_eq!(workflow_repo.find_all().await?.len(), 2);
    assert_eq!(
        workflow_repo.find_by_owner(&OwnerId::from("alice")).await?,
        vec![first.clone()]
    );
    assert_eq!(workflow_repo.find_active().await?, vec![second]);

    workflow_repo.delete(&first.id).await?;
    assert!(workflow_repo.find_by_id(&first.id).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_stale_save_is_a_version_conflict() -> Result<(), CoreError> {
    let provider = InMemoryStateStoreProvider::new();
    let (workflow_repo, _) = provider.create_repositories();

    let original = workflow("wf-1", "alice");
    workflow_repo.save(&original).await?;
    // Re-saving the identical document is harmless
    workflow_repo.save(&original).await?;

    let mut first_writer = original.clone();
    let mut second_writer = original.clone();
    first_writer.name = "Renamed".to_string();
    first_writer.touch();
    workflow_repo.save(&first_writer).await?;

    second_writer.description = "Concurrent edit".to_string();
    second_writer.touch();
    let result = workflow_repo.save(&second_writer).await;
    assert_eq!(
        result,
        Err(CoreError::VersionConflict {
            workflow_id: "wf-1".to_string(),
            expected: original.version,
            found: original.version + 1,
        })
    );

    let stored = workflow_repo.find_by_id(&original.id).await?.unwrap();
    assert_eq!(stored.name, "Renamed");
    Ok(())
}

#[tokio::test]
async fn test_run_repository() -> Result<(), CoreError> {
    let provider = InMemoryStateStoreProvider::new();
    let (_, run_repo) = provider.create_repositories();
    let workflow = workflow("wf-1", "alice");

    let run = finished_run(&workflow);
    run_repo.append_run(&run).await?;
    assert!(matches!(
        run_repo.append_run(&run).await,
        Err(CoreError::StateStoreError(_))
    ));

    let stored = run_repo.find_by_id(&run.id).await?.unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert_eq!(
        serde_json::to_value(&stored).unwrap(),
        serde_json::to_value(&run).unwrap()
    );

    let second = finished_run(&workflow);
    run_repo.append_run(&second).await?;
    let history = run_repo.list_for_workflow(&workflow.id).await?;
    let ids: Vec<_> = history.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![run.id.clone(), second.id.clone()]);
    assert_eq!(provider.run_count().await, 2);

    assert_eq!(run_repo.delete_for_workflow(&workflow.id).await?, 2);
    assert!(run_repo.list_for_workflow(&workflow.id).await?.is_empty());
    assert_eq!(provider.run_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_unfinished_run_is_refused() {
    let provider = InMemoryStateStoreProvider::new();
    let (_, run_repo) = provider.create_repositories();
    let workflow = workflow("wf-1", "alice");
    let order = workflow.graph.execution_order();
    let run = Run::new(
        &workflow,
        &order,
        TriggerEvent::manual(workflow.id.clone(), DataPacket::null()),
    );

    assert!(matches!(
        run_repo.append_run(&run).await,
        Err(CoreError::StateStoreError(_))
    ));
}

#[tokio::test]
async fn test_seed_is_all_or_nothing() {
    let provider = InMemoryStateStoreProvider::new();
    let good = serde_json::to_value(workflow("wf-1", "alice")).unwrap();
    let mut cyclic = serde_json::to_value(workflow("wf-2", "alice")).unwrap();
    cyclic["connections"]
        .as_array_mut()
        .unwrap()
        .push(json!({"from": "a", "to": "t"}));

    let result = provider.seed_workflows(vec![good.clone(), cyclic]).await;
    assert!(matches!(result, Err(CoreError::ValidationError(_))));
    assert!(provider.export_workflows().await.is_empty());

    assert_eq!(provider.seed_workflows(vec![good.clone()]).await.unwrap(), 1);
    assert_eq!(provider.export_workflows().await, vec![good]);

    let (workflow_repo, _) = provider.create_repositories();
    assert!(workflow_repo
        .find_by_id(&WorkflowId::from("wf-1"))
        .await
        .unwrap()
        .is_some());
}

#[test]
fn test_repositories_share_storage() {
    let provider = InMemoryStateStoreProvider::default();
    let (writer, _) = provider.create_repositories();
    let (reader, _) = provider.create_repositories();
    let workflow = workflow("wf-1", "alice");

    tokio_test::block_on(async {
        writer.save(&workflow).await.unwrap();
        assert_eq!(reader.find_by_id(&workflow.id).await.unwrap(), Some(workflow));
    });
}
