mod splitting_tests;
